//! ATIMEFILE - Interactive Shell
//! Drives a file-backed access-time table from the command line.

use std::io::{self, BufRead, Write};

use atimefile::config::Config;
use atimefile::error::Result;
use atimefile::table::file::FileStore;
use atimefile::table::{AtimeTable, DeleteOutcome};
use atimefile::types::{Key, Timestamp};

const TABLE_ID: u64 = 1;

fn main() {
    env_logger::init();

    println!();
    println!("  ╔═══════════════════════════════════════════╗");
    println!("  ║            ATIMEFILE Table Shell          ║");
    println!("  ║     Block-Structured Access-Time Table    ║");
    println!("  ╚═══════════════════════════════════════════╝");
    println!();
    println!("  Commands:");
    println!("    touch <key> [secs]  - Get the atime, recording secs (or now) if unset");
    println!("    set <key> [secs]    - Refresh an existing atime");
    println!("    get <key>           - Show the recorded atime");
    println!("    del <key>           - Forget a key's atime");
    println!("    check | repair      - Verify (and fix) block counts");
    println!("    sync                - Flush to disk");
    println!("    stats               - Show table statistics");
    println!("    exit                - Shutdown");
    println!();

    let config = Config::default();
    let opened = FileStore::open(&config).and_then(|s| AtimeTable::open(s, TABLE_ID, &config));
    let mut table = match opened {
        Ok(t) => t,
        Err(err) => {
            eprintln!("[ERROR] Failed to open table: {}", err);
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("atime> ");
        if stdout.flush().is_err() {
            break;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break, // EOF
            Ok(_) => {}
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        let command = parts[0].to_lowercase();
        if matches!(command.as_str(), "exit" | "quit" | "q") {
            println!("  Shutting down ATIMEFILE...");
            break;
        }
        if let Err(e) = run(&mut table, &command, &parts[1..]) {
            println!("  ERROR: {}", e);
        }
    }

    if let Err(e) = table.sync() {
        eprintln!("[ERROR] Final sync failed: {}", e);
    }
}

fn run(table: &mut AtimeTable<FileStore>, command: &str, args: &[&str]) -> Result<()> {
    match command {
        "touch" => {
            let Some((key, ts)) = parse_key_time(args) else {
                println!("  Usage: touch <key> [secs]");
                return Ok(());
            };
            println!("  {}", table.get_or_init(key, ts)?);
        }
        "set" => {
            let Some((key, ts)) = parse_key_time(args) else {
                println!("  Usage: set <key> [secs]");
                return Ok(());
            };
            table.set(key, ts)?;
            println!("  OK");
        }
        "get" => {
            let Some(key) = args.first().and_then(|k| k.parse::<Key>().ok()) else {
                println!("  Usage: get <key>");
                return Ok(());
            };
            match table.lookup(key)? {
                Some(ts) => println!("  {}", ts),
                None => println!("  (nil)"),
            }
        }
        "del" | "delete" => {
            let Some(key) = args.first().and_then(|k| k.parse::<Key>().ok()) else {
                println!("  Usage: del <key>");
                return Ok(());
            };
            match table.delete(key)? {
                DeleteOutcome::NotPresent => println!("  (nil)"),
                DeleteOutcome::Cleared => println!("  OK (deleted)"),
                DeleteOutcome::BlockReclaimed => println!("  OK (deleted, block reclaimed)"),
            }
        }
        "check" | "repair" => {
            let report = if command == "repair" {
                table.repair()?
            } else {
                table.check()?
            };
            println!("  Blocks checked:  {}", report.blocks_checked);
            println!("  Live entries:    {}", report.live_entries);
            println!("  Bad counts:      {:?}", report.count_mismatches);
            println!("  Empty blocks:    {:?}", report.empty_blocks);
            println!("  Corrupt blocks:  {:?}", report.corrupt_blocks);
            println!("  Metadata stale:  {}", report.meta_mismatch);
        }
        "sync" => {
            table.sync()?;
            println!("  OK");
        }
        "info" | "stats" => {
            let layout = table.layout();
            println!("  Entries/block: {}", layout.entries_per_block());
            println!("  Block size:    {} bytes", layout.block_size());
            println!("  Live blocks:   {}", table.live_blocks());
            println!("  Live entries:  {}", table.live_entries());
            println!("{}", table.metrics().report());
        }
        _ => {
            println!("  Unknown command: '{}'. Type 'exit' to quit.", command);
        }
    }
    Ok(())
}

fn parse_key_time(args: &[&str]) -> Option<(Key, Timestamp)> {
    let key = args.first()?.parse::<Key>().ok()?;
    let ts = match args.get(1) {
        Some(secs) => Timestamp::from_secs(secs.parse().ok()?),
        None => Timestamp::now(),
    };
    Some((key, ts))
}
