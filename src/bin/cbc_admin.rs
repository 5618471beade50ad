//! CoinBitClub operator CLI
//!
//! Usage:
//!   cargo run --bin cbc_admin -- migrate
//!   cargo run --bin cbc_admin -- create-user --email a@b.c --name Ana --password ... --role admin
//!   cargo run --bin cbc_admin -- check-keys --status pending
//!   cargo run --bin cbc_admin -- probe --exchange bybit --api-key ... --secret-key ...

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use coinbitclub::auth::hash_password;
use coinbitclub::db::{NewSignal, NewUser, PostgresPersistence};
use coinbitclub::exchange::{client_for, client_for_key, diagnose_key, new_rate_limiter, KeyCheck};
use coinbitclub::models::{mask_key, Exchange, SignalStatus, User, UserRole, ValidationStatus};
use coinbitclub::webhook::{parse_signal, ParsedSignal};
use coinbitclub::AppConfig;
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "cbc_admin")]
#[command(about = "CoinBitClub maintenance and diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations
    Migrate,

    /// Create a platform account
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long, env = "CBC_NEW_USER_PASSWORD")]
        password: String,
        #[arg(long, default_value = "user")]
        role: UserRole,
        /// Email of the referring affiliate
        #[arg(long)]
        referred_by: Option<String>,
    },

    /// Overwrite a user's available balance for one asset
    SetBalance {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "USDT")]
        asset: String,
        #[arg(long)]
        amount: Decimal,
    },

    /// Add (or subtract, with a negative delta) to a user's balance
    AdjustBalance {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "USDT")]
        asset: String,
        #[arg(long, allow_hyphen_values = true)]
        delta: Decimal,
    },

    /// Store exchange credentials for a user (status resets to pending)
    AddApiKey {
        #[arg(long)]
        email: String,
        #[arg(long)]
        exchange: Exchange,
        #[arg(long, env = "CBC_API_KEY")]
        api_key: String,
        #[arg(long, env = "CBC_SECRET_KEY")]
        secret_key: String,
        #[arg(long)]
        testnet: bool,
    },

    /// Force a key's validation status
    SetKeyStatus {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        status: ValidationStatus,
        #[arg(long)]
        message: Option<String>,
    },

    /// Probe stored keys against their exchange and record the result
    CheckKeys {
        #[arg(long)]
        status: Option<ValidationStatus>,
        /// Only this user's keys
        #[arg(long)]
        email: Option<String>,
    },

    /// Probe raw credentials without touching the database
    Probe {
        #[arg(long)]
        exchange: Exchange,
        #[arg(long, env = "CBC_API_KEY")]
        api_key: String,
        #[arg(long, env = "CBC_SECRET_KEY")]
        secret_key: String,
        #[arg(long)]
        testnet: bool,
    },

    /// Fill in parsed_data for deliveries stored before parsing existed
    ReparseSignals {
        #[arg(long, default_value_t = 500)]
        limit: i64,
    },

    /// Delete old rejected signals
    PurgeSignals {
        #[arg(long)]
        older_than_days: i64,
        /// Also delete never-parsed rows
        #[arg(long)]
        include_unparsed: bool,
        #[arg(long)]
        dry_run: bool,
    },

    /// Insert parsed demo signals for dashboard testing
    SeedDemoSignals {
        #[arg(long, default_value_t = 5)]
        count: u32,
        #[arg(long, default_value = "BTCUSDT")]
        symbol: String,
        #[arg(long, default_value = "50000")]
        price: Decimal,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("coinbitclub=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("Failed to load configuration")?;

    let db = match &cli.command {
        Command::Probe {
            exchange,
            api_key,
            secret_key,
            testnet,
        } => {
            let limiter = new_rate_limiter(config.exchange.requests_per_minute);
            let client =
                client_for(*exchange, api_key, secret_key, *testnet, &config.exchange, limiter);
            let check = diagnose_key(client.as_ref(), config.exchange.recv_window_ms).await;
            print_check(&format!("{} {}", exchange, mask_key(api_key)), &check);
            return Ok(());
        }
        _ => PostgresPersistence::new(
            &config.database.url,
            config.database.max_connections,
            false,
        )
        .await
        .map_err(boxed)
        .context("Failed to connect to Postgres")?,
    };

    match cli.command {
        Command::Migrate => {
            db.migrate().await.map_err(boxed)?;
            println!("✅ Migrations applied");
        }

        Command::CreateUser {
            email,
            name,
            password,
            role,
            referred_by,
        } => {
            let referrer = match referred_by {
                Some(email) => Some(find_user(&db, &email).await?.id),
                None => None,
            };
            let password_hash = hash_password(&password)?;
            let user = db
                .create_user(NewUser {
                    email: &email,
                    name: &name,
                    password_hash: &password_hash,
                    role,
                    referred_by: referrer,
                })
                .await
                .map_err(boxed)
                .with_context(|| format!("Failed to create {}", email))?;
            println!("✅ Created {} {} ({})", user.role, user.email, user.id);
        }

        Command::SetBalance {
            email,
            asset,
            amount,
        } => {
            let user = find_user(&db, &email).await?;
            let balance = db.set_balance(user.id, &asset, amount).await.map_err(boxed)?;
            println!("✅ {} {} = {}", user.email, balance.asset, balance.available);
        }

        Command::AdjustBalance {
            email,
            asset,
            delta,
        } => {
            let user = find_user(&db, &email).await?;
            let balance = db.adjust_balance(user.id, &asset, delta).await.map_err(boxed)?;
            println!(
                "✅ {} {} {:+} -> {}",
                user.email, balance.asset, delta, balance.available
            );
        }

        Command::AddApiKey {
            email,
            exchange,
            api_key,
            secret_key,
            testnet,
        } => {
            let user = find_user(&db, &email).await?;
            let key = db
                .upsert_api_key(user.id, exchange, &api_key, &secret_key, testnet)
                .await
                .map_err(boxed)?;
            println!(
                "✅ Stored {} key {} for {} ({}); run check-keys to validate",
                key.exchange,
                key.masked_key(),
                user.email,
                key.id
            );
        }

        Command::SetKeyStatus {
            id,
            status,
            message,
        } => {
            db.set_validation_status(id, status, message.as_deref())
                .await
                .map_err(boxed)?;
            println!("✅ Key {} marked {}", id, status);
        }

        Command::CheckKeys { status, email } => {
            let keys = match email {
                Some(email) => {
                    let user = find_user(&db, &email).await?;
                    let keys = db.list_api_keys(user.id).await.map_err(boxed)?;
                    keys.into_iter()
                        .filter(|k| status.map_or(true, |s| k.validation_status == s))
                        .collect()
                }
                None => db.list_api_keys_by_status(status).await.map_err(boxed)?,
            };

            if keys.is_empty() {
                println!("No keys to check");
            }

            let limiter = new_rate_limiter(config.exchange.requests_per_minute);
            let mut changed = 0;
            for key in &keys {
                let client = client_for_key(key, &config.exchange, limiter.clone());
                let check = diagnose_key(client.as_ref(), config.exchange.recv_window_ms).await;
                print_check(&format!("{} {} ({})", key.exchange, key.masked_key(), key.id), &check);

                if check.status != key.validation_status {
                    changed += 1;
                }
                db.set_validation_status(key.id, check.status, Some(&check.message))
                    .await
                    .map_err(boxed)?;
            }
            println!("\nChecked {} key(s), {} changed status", keys.len(), changed);
        }

        Command::ReparseSignals { limit } => {
            let signals = db.signals_missing_parsed_data(limit).await.map_err(boxed)?;
            let (mut parsed, mut rejected) = (0, 0);

            for signal in &signals {
                match parse_signal(&signal.raw_payload) {
                    Ok(data) => {
                        let value = serde_json::to_value(&data)?;
                        db.set_parsed_data(signal.id, &value).await.map_err(boxed)?;
                        parsed += 1;
                    }
                    Err(e) => {
                        db.mark_signal_status(signal.id, SignalStatus::Rejected, Some(&e.to_string()))
                            .await
                            .map_err(boxed)?;
                        println!("  ❌ {}: {}", signal.id, e);
                        rejected += 1;
                    }
                }
            }
            println!(
                "✅ Reparsed {} signal(s): {} parsed, {} rejected",
                signals.len(),
                parsed,
                rejected
            );
        }

        Command::PurgeSignals {
            older_than_days,
            include_unparsed,
            dry_run,
        } => {
            if older_than_days < 1 {
                bail!("--older-than-days must be at least 1");
            }
            let cutoff = Utc::now() - ChronoDuration::days(older_than_days);

            if dry_run {
                let count = db
                    .count_purgeable_signals(cutoff, include_unparsed)
                    .await
                    .map_err(boxed)?;
                println!("Would delete {} signal(s) received before {}", count, cutoff);
            } else {
                let deleted = db
                    .purge_signals(cutoff, include_unparsed)
                    .await
                    .map_err(boxed)?;
                println!("✅ Deleted {} signal(s) received before {}", deleted, cutoff);
            }
        }

        Command::SeedDemoSignals {
            count,
            symbol,
            price,
        } => {
            for i in 0..count {
                let signal = demo_signal(&symbol, price, i)?;
                let raw = serde_json::json!({
                    "symbol": signal.symbol,
                    "action": signal.action,
                    "price": signal.price,
                    "strategy": signal.strategy,
                });
                let parsed = serde_json::to_value(&signal)?;
                let id = db
                    .insert_signal(NewSignal {
                        source: "demo",
                        raw_payload: &raw,
                        parsed_data: Some(&parsed),
                        status: SignalStatus::Parsed,
                        error: None,
                        fingerprint: None,
                    })
                    .await
                    .map_err(boxed)?;
                println!("  {} {} {} @ {}", id, signal.action, signal.symbol, price);
            }
            println!("✅ Seeded {} demo signal(s)", count);
        }

        // Handled above without a database
        Command::Probe { .. } => {}
    }

    Ok(())
}

fn boxed(e: Box<dyn std::error::Error + Send + Sync>) -> anyhow::Error {
    anyhow!(e)
}

async fn find_user(db: &PostgresPersistence, email: &str) -> Result<User> {
    db.get_user_by_email(email)
        .await
        .map_err(boxed)?
        .ok_or_else(|| anyhow!("No user with email {}", email))
}

/// Alternating buy/sell so the dashboards show both sides
fn demo_signal(symbol: &str, price: Decimal, index: u32) -> Result<ParsedSignal> {
    let raw = serde_json::json!({
        "symbol": symbol,
        "action": if index % 2 == 0 { "buy" } else { "sell" },
        "price": price.to_string(),
        "strategy": "demo",
    });
    let mut signal = parse_signal(&raw)?;
    signal.timeframe = Some("15".to_string());
    Ok(signal)
}

fn print_check(label: &str, check: &KeyCheck) {
    let icon = match check.status {
        ValidationStatus::Valid => "✅",
        ValidationStatus::NeedsUpdate => "⚠️ ",
        ValidationStatus::Invalid => "❌",
        ValidationStatus::Pending => "⏳",
    };
    println!("{} {}: {} - {}", icon, label, check.status, check.message);
    if let Some(skew) = check.clock_skew_ms {
        println!("     clock skew: {}ms", skew);
    }
}
