//! Read-only command line inspector over a bill database.
//!
//! Usage: `billsplit_cli [bills | bill <name> | ledger]`. The database path
//! and logging come from `BILLSPLIT_*` environment variables.

use billsplit_core::db::open_db;
use billsplit_core::{
    core_version, init_logging, BillService, CoreConfig, SqliteBillRepository,
};
use log::error;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run(std::env::args().skip(1).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("event=cli_exit module=cli status=error error={message}");
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    let config = CoreConfig::from_env()?;
    if let Some(log_dir) = config.log_dir.as_deref() {
        init_logging(config.log_level, log_dir)?;
    }

    let mut conn = open_db(&config.db_path).map_err(|err| err.to_string())?;
    let repo = SqliteBillRepository::try_new(&mut conn).map_err(|err| err.to_string())?;
    let mut service = BillService::new(repo);

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["bills"] => {
            println!("billsplit_core version={}", core_version());
            let listings = service.list_bills().map_err(|err| err.to_string())?;
            for listing in listings {
                println!(
                    "{}\tstatus={}\tmembers={}",
                    listing.name, listing.status, listing.members
                );
            }
        }
        ["bill", name] => {
            let view = service.manage_bill(name).map_err(|err| err.to_string())?;
            println!("{name}\tgroup={}", view.group);
            for item in view.items {
                let users: Vec<String> = item
                    .users
                    .iter()
                    .map(|user| format!("{}={}", user.username, user.share))
                    .collect();
                println!("  {}\t{}", item.name, users.join(" "));
            }
        }
        ["ledger"] => {
            for entry in service.ledger().map_err(|err| err.to_string())? {
                for bill in entry.bills {
                    println!("{}\t{}\t{}", entry.username, bill.name, bill.amount);
                }
            }
        }
        other => return Err(format!("unknown command: {}", other.join(" "))),
    }

    Ok(())
}
