use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use contracts::{BucketCategory, ClientStatus, OrgContext, TransactionKind};
use ledger_api::{
    serve, CreateBucketRequest, CreateClientRequest, ProviderApi, RecordTransactionRequest,
};

fn print_usage() {
    println!("ledger-cli <command>");
    println!("commands:");
    println!("  serve [addr]");
    println!("    default addr: 127.0.0.1:8080");
    println!("  demo [sqlite_path]");
    println!("    seeds a demo org and walks a draw-down bucket through debits");
    println!("  status <org_id> <bucket_id> [sqlite_path]");
    println!("    prints the bucket balance and utilization");
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value.map(String::as_str).unwrap_or("127.0.0.1:8080");
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn default_sqlite_path() -> String {
    std::env::var("LEDGER_SQLITE_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "funding_ledger.sqlite".to_string())
}

fn parse_sqlite_path(value: Option<&String>) -> String {
    value
        .map(String::to_string)
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(default_sqlite_path)
}

fn run_demo(args: &[String]) -> Result<(), String> {
    let sqlite_path = parse_sqlite_path(args.get(2));
    let ctx = OrgContext::new("org:demo");

    let mut api = ProviderApi::open(PathBuf::from(&sqlite_path))
        .map_err(|err| format!("failed to open store: {err}"))?;

    let client = api
        .create_client(
            &ctx,
            CreateClientRequest {
                client_id: None,
                name: "Demo Client".to_string(),
                date_of_birth: None,
                care_recipient_id: None,
            },
        )
        .map_err(|err| format!("failed to create client: {err}"))?;
    let client = api
        .transition_client(&ctx, &client.client_id, ClientStatus::Active)
        .map_err(|err| format!("failed to activate client: {err}"))?;

    let bucket = api
        .create_bucket(
            &ctx,
            &client.client_id,
            CreateBucketRequest {
                name: Some("Home care package".to_string()),
                category: Some(BucketCategory::DrawDown),
                funding_source: Some("HCP".to_string()),
                allocated_amount_cents: Some(1_000_000),
                ..CreateBucketRequest::default()
            },
        )
        .map_err(|err| format!("failed to create bucket: {err}"))?;
    println!(
        "created bucket {} balance={} limit={}",
        bucket.bucket_id, bucket.current_balance_cents, bucket.credit_limit_cents
    );

    let receipt = api
        .record_transaction(
            &ctx,
            &bucket.bucket_id,
            RecordTransactionRequest {
                kind: TransactionKind::Debit,
                amount_cents: 400_000,
                description: "personal care fortnight".to_string(),
            },
        )
        .map_err(|err| format!("debit failed: {err}"))?;
    println!(
        "debited 400000 -> balance={} balance_after={}",
        receipt.new_balance_cents, receipt.transaction.balance_after_cents
    );

    match api.record_transaction(
        &ctx,
        &bucket.bucket_id,
        RecordTransactionRequest {
            kind: TransactionKind::Debit,
            amount_cents: 700_000,
            description: "overdrawing debit".to_string(),
        },
    ) {
        Ok(_) => return Err("overdrawing debit unexpectedly succeeded".to_string()),
        Err(err) => println!("debit 700000 rejected: {err}"),
    }

    let after = api
        .get_bucket(&ctx, &bucket.bucket_id)
        .map_err(|err| format!("failed to re-read bucket: {err}"))?;
    println!(
        "final balance={} sqlite={}",
        after.current_balance_cents, sqlite_path
    );
    Ok(())
}

fn run_status(args: &[String]) -> Result<(), String> {
    let org_id = args
        .get(2)
        .cloned()
        .ok_or_else(|| "missing org_id".to_string())?;
    let bucket_id = args
        .get(3)
        .cloned()
        .ok_or_else(|| "missing bucket_id".to_string())?;
    let sqlite_path = parse_sqlite_path(args.get(4));

    let ctx = OrgContext::new(org_id);
    let api = ProviderApi::open(PathBuf::from(&sqlite_path))
        .map_err(|err| format!("failed to open store: {err}"))?;
    let utilization = api
        .bucket_utilization(&ctx, &bucket_id)
        .map_err(|err| format!("failed to read bucket: {err}"))?;

    println!(
        "bucket={} status={} balance={} limit={} utilization={:.1}%",
        utilization.bucket.bucket_id,
        utilization.bucket.status.as_str(),
        utilization.bucket.current_balance_cents,
        utilization.bucket.credit_limit_cents,
        utilization.utilization_pct
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("serve") => match parse_socket_addr(args.get(2)) {
            Ok(addr) => {
                let sqlite_path = PathBuf::from(default_sqlite_path());
                println!("serving api on http://{addr} sqlite={}", sqlite_path.display());
                if let Err(err) = serve(addr, sqlite_path).await {
                    eprintln!("server error: {err}");
                    std::process::exit(1);
                }
            }
            Err(err) => {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        },
        Some("demo") => {
            if let Err(err) = run_demo(&args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        Some("status") => {
            if let Err(err) = run_status(&args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        _ => {
            print_usage();
        }
    }
}
