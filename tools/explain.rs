//! Explain how an access control configuration treats a request.
//!
//! Evaluates every rule against the given subject and URL without stopping
//! at the first match, and prints which dimensions matched.
//!
//! Output format:
//!   #  POLICY      DOMAIN RESOURCE QUERY METHOD NETWORK SUBJECT  RESULT
//!
//! Usage:
//!   cargo run --bin acl-explain -- <config.toml> <url> [OPTIONS]
//!
//! Options:
//!   --method M   Request method (default GET)
//!   --user U     Username
//!   --group G    Group membership, repeatable
//!   --client C   OAuth2 client identifier
//!   --ip A       Source address (default 127.0.0.1)
//!   --json       Print the per-rule results as JSON
//!   --help       Show help

use proxy_authz::{Authorizer, Object, RuleMatchResult, Subject};
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug)]
struct Args {
    config: PathBuf,
    url: String,
    method: String,
    user: String,
    groups: Vec<String>,
    client: String,
    ip: IpAddr,
    json: bool,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut positional = Vec::new();
    let mut method = "GET".to_string();
    let mut user = String::new();
    let mut groups = Vec::new();
    let mut client = String::new();
    let mut ip = IpAddr::from([127, 0, 0, 1]);
    let mut json = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("Option {} requires a value", name))
        };

        match arg.as_str() {
            "--method" => method = value("--method")?,
            "--user" => user = value("--user")?,
            "--group" => groups.push(value("--group")?),
            "--client" => client = value("--client")?,
            "--ip" => {
                let raw = value("--ip")?;
                ip = raw.parse().map_err(|e| format!("Invalid address '{}': {}", raw, e))?;
            }
            "--json" => json = true,
            _ if !arg.starts_with('-') => positional.push(arg.clone()),
            _ => return Err(format!("Unknown option: {}", arg)),
        }
    }

    let [config, url]: [String; 2] = positional
        .try_into()
        .map_err(|_| "Expected exactly two arguments: <config.toml> <url>".to_string())?;

    Ok(Args {
        config: PathBuf::from(config),
        url,
        method,
        user,
        groups,
        client,
        ip,
        json,
    })
}

fn mark(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn outcome(result: &RuleMatchResult) -> &'static str {
    if result.skipped {
        "skipped"
    } else if result.is_match() {
        "MATCH"
    } else if result.is_potential_match() {
        "potential"
    } else {
        "-"
    }
}

fn print_results(results: &[RuleMatchResult]) {
    if results.is_empty() {
        println!("\nNo rules configured.");
        return;
    }

    println!(
        "\n{:>3}  {:<10}  {:<6} {:<8} {:<5} {:<6} {:<7} {:<7}  {}",
        "#", "POLICY", "DOMAIN", "RESOURCE", "QUERY", "METHOD", "NETWORK", "SUBJECT", "RESULT"
    );
    println!("{}", "-".repeat(80));

    for result in results {
        let subject = match (result.match_subjects_exact, result.match_subjects) {
            (true, _) => "yes",
            (false, true) => "maybe",
            (false, false) => "no",
        };
        println!(
            "{:>3}  {:<10}  {:<6} {:<8} {:<5} {:<6} {:<7} {:<7}  {}",
            result.position,
            result.policy.to_string(),
            mark(result.match_domain),
            mark(result.match_resources),
            mark(result.match_query),
            mark(result.match_methods),
            mark(result.match_networks),
            subject,
            outcome(result),
        );
    }
}

fn print_help() {
    println!("Access Control Explain");
    println!();
    println!("Usage: acl-explain <config.toml> <url> [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --method M   Request method (default GET)");
    println!("  --user U     Username");
    println!("  --group G    Group membership, repeatable");
    println!("  --client C   OAuth2 client identifier");
    println!("  --ip A       Source address (default 127.0.0.1)");
    println!("  --json       Print the per-rule results as JSON");
    println!("  --help       Show this help message");
}

fn run(args: Args) -> Result<(), String> {
    let authorizer = Authorizer::from_toml_file(&args.config)
        .map_err(|e| format!("Failed to load {}: {}", args.config.display(), e))?;

    let object =
        Object::parse(&args.url, &args.method).map_err(|e| format!("Invalid URL '{}': {}", args.url, e))?;

    let mut subject = Subject::new(args.user, args.ip).with_groups(args.groups);
    if !args.client.is_empty() {
        subject = subject.with_client_id(args.client);
    }

    let results = authorizer.rule_match_results(&subject, &object);
    let decision = authorizer.evaluate(&subject, &object);

    if args.json {
        let body = serde_json::json!({
            "subject": subject.to_string(),
            "object": object.to_string(),
            "method": object.method,
            "rules": results,
            "policy": decision.level,
            "position": decision.position,
        });
        let text = serde_json::to_string_pretty(&body).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    println!("Subject: {}", subject);
    println!("Object:  {} {}", object.method, object);
    print_results(&results);

    match decision.position {
        Some(position) => println!("\nDecision: {} (rule #{})", decision.level, position),
        None => println!("\nDecision: {} (default policy)", decision.level),
    }
    if authorizer.is_second_factor_enabled() {
        println!("Second factor: enabled");
    }

    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxy_authz=warn".into()),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help") {
        print_help();
        return;
    }

    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
