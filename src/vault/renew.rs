use crate::{cli::globals::GlobalArgs, vault};
use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{
    sync::mpsc,
    time::{sleep, Duration},
};
use tracing::{debug, error, instrument, warn};

const MAX_ATTEMPTS: u32 = 3;

/// Delay before the next renewal: 70-90% of the granted lease.
fn jittered(lease_duration: u64, rng: &mut StdRng) -> Duration {
    let factor = rng.gen_range(70..90);
    Duration::from_secs(lease_duration * factor / 100)
}

/// Keep the Vault token and the database lease alive in the background.
///
/// Each renewal retries three times with exponential backoff. When a lease cannot be
/// renewed a message is sent on `tx` so the server shuts down instead of running with
/// credentials that are about to expire.
///
/// # Errors
/// Returns an error if the renewal tasks cannot be set up.
#[instrument(skip(globals, tx))]
pub async fn try_renew(globals: &GlobalArgs, tx: mpsc::UnboundedSender<()>) -> Result<()> {
    tokio::spawn({
        let mut rng = StdRng::from_entropy();
        let url = globals.vault_url.clone();
        let token = globals.vault_token.clone();
        let tx = tx.clone();

        async move {
            loop {
                let mut next = Duration::default();
                for attempt in 1..=MAX_ATTEMPTS {
                    if attempt > 1 {
                        let backoff_time = 2u64.pow(attempt - 1);
                        warn!("Backing off for {} seconds", backoff_time);
                        sleep(Duration::from_secs(backoff_time)).await;
                    }

                    match vault::renew_token(&url, &token).await {
                        Ok(lease_duration) => {
                            next = jittered(lease_duration, &mut rng);
                            break;
                        }
                        Err(e) => {
                            error!("Failed to renew token: {}", e);
                            if attempt == MAX_ATTEMPTS {
                                error!("Failed to renew token after {MAX_ATTEMPTS} attempts");
                                let _ = tx.send(());
                                return;
                            }
                        }
                    }
                }

                debug!("Will renew token in {} seconds", next.as_secs());
                sleep(next).await;
            }
        }
    });

    if globals.vault_db_lease_id.is_empty() {
        return Ok(());
    }

    tokio::spawn({
        let mut rng = StdRng::from_entropy();
        let url = globals.vault_url.clone();
        let token = globals.vault_token.clone();
        let lease_id = globals.vault_db_lease_id.clone();
        let increment = globals.vault_db_lease_duration;
        let mut next = jittered(increment, &mut rng);

        async move {
            loop {
                debug!("Will renew DB lease in {} seconds", next.as_secs());
                sleep(next).await;

                for attempt in 1..=MAX_ATTEMPTS {
                    if attempt > 1 {
                        let backoff_time = 2u64.pow(attempt - 1);
                        warn!("Backing off for {} seconds", backoff_time);
                        sleep(Duration::from_secs(backoff_time)).await;
                    }

                    match vault::renew_lease(&url, &token, &lease_id, increment).await {
                        Ok(lease_duration) => {
                            next = jittered(lease_duration, &mut rng);
                            break;
                        }
                        Err(e) => {
                            error!("Failed to renew DB lease: {}", e);
                            if attempt == MAX_ATTEMPTS {
                                error!("Failed to renew DB lease after {MAX_ATTEMPTS} attempts");
                                let _ = tx.send(());
                                return;
                            }
                        }
                    }
                }
            }
        }
    });

    Ok(())
}
