//! Test Score Request Producer
//!
//! Generates remittance-style transactions and publishes them as score requests to NATS.

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

/// Synthetic transaction generator
struct TransactionGenerator {
    rng: rand::rngs::ThreadRng,
    transaction_counter: i64,
}

impl TransactionGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            transaction_counter: 0,
        }
    }

    fn date_days_ago(&mut self, min: i64, max: i64) -> String {
        let days = self.rng.gen_range(min..max);
        (Utc::now() - ChronoDuration::days(days))
            .format("%Y-%m-%d")
            .to_string()
    }

    /// A typical remittance from an established customer
    fn generate_legitimate(&mut self) -> Value {
        self.transaction_counter += 1;
        let amount: f64 = self.rng.gen_range(100_000.0..1_500_000.0);
        let name = format!("CUSTOMER {}", self.rng.gen_range(1..5000));

        json!({
            "transaction_seq": self.transaction_counter,
            "create_dt": Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            "deposit_amount": amount,
            "transaction_amount_24hour": amount * self.rng.gen_range(1.0..2.0),
            "transaction_amount_1week": amount * self.rng.gen_range(2.0..5.0),
            "transaction_amount_1month": amount * self.rng.gen_range(4.0..10.0),
            "receiving_country": self.random_choice(&["VN", "PH", "NP", "ID", "KH"]),
            "country_code": self.random_choice(&["VN", "PH", "NP", "ID", "KH"]),
            "id_type": self.random_choice(&["ARC", "PASSPORT"]),
            "stay_qualify": self.random_choice(&["E-9", "F-4", "D-2"]),
            "payment_method": self.random_choice(&["BANK", "AUTODEBIT"]),
            "register_date": self.date_days_ago(200, 2000),
            "first_transaction_date": self.date_days_ago(100, 200),
            "visa_expire_date": (Utc::now() + ChronoDuration::days(self.rng.gen_range(180..1000)))
                .format("%Y-%m-%d")
                .to_string(),
            "birth_date": self.date_days_ago(8000, 18000),
            "user_name": name,
            "sender_name": name,
        })
    }

    /// Large, fresh-account transfer near the rolling limits with a name mismatch
    fn generate_suspicious(&mut self) -> Value {
        self.transaction_counter += 1;
        let amount: f64 = self.rng.gen_range(3_000_000.0..4_900_000.0);

        json!({
            "transaction_seq": self.transaction_counter,
            // late-night hours
            "create_dt": format!(
                "{} {:02}:{:02}:00",
                Utc::now().format("%Y-%m-%d"),
                self.rng.gen_range(0..6),
                self.rng.gen_range(0..60)
            ),
            "deposit_amount": amount,
            "transaction_amount_24hour": 4_800_000.0,
            "transaction_amount_1week": amount * 4.0,
            "transaction_amount_1month": amount * 10.0,
            "receiving_country": self.random_choice(&["KH", "MM", "UZ"]),
            "country_code": self.random_choice(&["VN", "UZ"]),
            "id_type": "PASSPORT",
            "stay_qualify": self.random_choice(&["C-3", "B-2"]),
            "payment_method": "BANK",
            "register_date": self.date_days_ago(0, 3),
            "first_transaction_date": self.date_days_ago(0, 2),
            "visa_expire_date": (Utc::now() + ChronoDuration::days(self.rng.gen_range(1..20)))
                .format("%Y-%m-%d")
                .to_string(),
            "birth_date": self.date_days_ago(7000, 9000),
            "user_name": format!("CUSTOMER {}", self.rng.gen_range(1..5000)),
            "sender_name": format!("THIRD PARTY {}", self.rng.gen_range(1..5000)),
        })
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

fn score_request(transactions: Vec<Value>, include_allow: bool) -> Value {
    json!({
        "transactions": transactions,
        "include_allow_explanations": include_allow,
        "top_k": 3,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Score Request Producer");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("transactions.score");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fraud_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.1);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);
    let batch_size: usize = args.get(6).and_then(|s| s.parse().ok()).unwrap_or(1).max(1);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        fraud_rate = fraud_rate,
        delay_ms = delay_ms,
        batch_size = batch_size,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, fraud_rate, delay_ms).await;
        }
    };

    let mut generator = TransactionGenerator::new();
    let mut rng = rand::thread_rng();

    info!("Starting to publish {} transactions...", count);

    let mut legitimate_count = 0;
    let mut suspicious_count = 0;
    let mut batch = Vec::with_capacity(batch_size);

    for i in 0..count {
        let transaction = if rng.gen_bool(fraud_rate) {
            suspicious_count += 1;
            generator.generate_suspicious()
        } else {
            legitimate_count += 1;
            generator.generate_legitimate()
        };
        batch.push(transaction);

        if batch.len() == batch_size || i + 1 == count {
            let request = score_request(std::mem::take(&mut batch), false);
            let payload = serde_json::to_vec(&request)?;
            client.publish(subject.to_string(), payload.into()).await?;
        }

        if (i + 1) % 10 == 0 {
            info!(
                "Published {}/{} transactions ({} legitimate, {} suspicious)",
                i + 1,
                count,
                legitimate_count,
                suspicious_count
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    client.flush().await?;

    info!(
        "Completed! Published {} transactions ({} legitimate, {} suspicious)",
        count, legitimate_count, suspicious_count
    );

    Ok(())
}

async fn run_dry_mode(count: u64, fraud_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = TransactionGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let transaction = if rng.gen_bool(fraud_rate) {
            generator.generate_suspicious()
        } else {
            generator.generate_legitimate()
        };

        if (i + 1) % 10 == 0 || i == 0 {
            let json = serde_json::to_string_pretty(&score_request(vec![transaction], true))?;
            info!("Sample score request {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
