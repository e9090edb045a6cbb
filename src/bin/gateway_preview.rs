//! Print the signed mobile-money request an intent would send, without sending it.
//!
//! Reads gateway settings from the same environment as the server.

use anyhow::{anyhow, Context};
use clap::Parser;
use pharmapay_backend::config::Config;
use pharmapay_backend::payments::currency::{convert_to_cents, validate_amount};
use pharmapay_backend::payments::providers::MobileMoneyGateway;
use pharmapay_backend::payments::types::{generate_transaction_id, IntentRequest, PaymentMethod};
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Payment method (mvola, orange_money, airtel_money)
    #[arg(long, default_value = "mvola")]
    method: PaymentMethod,

    /// Amount in major units, e.g. 25000
    #[arg(long)]
    amount: Decimal,

    /// Currency code; defaults to PAYMENT_CURRENCY
    #[arg(long)]
    currency: Option<String>,

    /// Payer wallet number
    #[arg(long)]
    phone: String,

    /// Order reference shown in the request metadata
    #[arg(long, default_value = "PREVIEW-ORDER")]
    order_reference: String,
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if !cli.method.is_mobile_money() {
        return Err(anyhow!("{} is not a mobile-money method", cli.method));
    }

    let config = Config::from_env()?;
    let mobile_money = config
        .payments
        .mobile_money
        .clone()
        .context("MOBILE_MONEY_BASE_URL is not configured")?;
    let currency = cli.currency.unwrap_or(config.payments.currency);

    let amount_cents = convert_to_cents(cli.amount)?;
    validate_amount(amount_cents, &currency)?;

    let gateway = MobileMoneyGateway::new(mobile_money)?;
    let request = IntentRequest {
        payment_id: Uuid::new_v4(),
        transaction_id: generate_transaction_id(chrono::Utc::now()),
        method: cli.method,
        amount_cents,
        currency,
        phone_number: Some(cli.phone),
        customer_id: Uuid::nil(),
        order_reference: cli.order_reference.clone(),
        description: format!("Order {}", cli.order_reference),
    };

    let preview = gateway.preview_request(&request)?;
    println!("{}", serde_json::to_string_pretty(&preview)?);
    Ok(())
}
