//! The QuarryDB shell entry point: opens (and recovers) the database
//! directory, then hands stdin to the statement loop.

use quarry_bin::Database;

fn main() {
    env_logger::init();
    let dir = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("QUARRY_DB").ok())
        .unwrap_or_else(|| "quarry".to_string());

    let db = match Database::open(&dir) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("failed to open database `{dir}`: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = quarry_bin::run_repl(&db) {
        eprintln!("session loop failed: {e}");
        std::process::exit(1);
    }
}
