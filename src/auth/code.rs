use std::time::Duration as StdDuration;

use rand::Rng;
use time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::state::AppState;

pub const CODE_LENGTH: usize = 6;
pub const CODE_TTL: Duration = Duration::minutes(15);

/// Uniform 6-digit numeric code, zero padded.
pub fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:06}", n)
}

pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

/// Periodically deletes expired verification codes.
pub fn spawn_sweeper(state: AppState, every: StdDuration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match state.store.purge_expired_codes(state.clock.now()).await {
                Ok(0) => debug!("code sweep: nothing expired"),
                Ok(n) => info!(purged = n, "code sweep"),
                Err(e) => error!(error = %e, "code sweep failed"),
            }
        }
    })
}
