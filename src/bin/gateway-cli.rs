use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Client for the Adversarial Gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway health and the active chain
    Health,
    /// Send one file to /predict
    Predict {
        /// File to upload
        file: PathBuf,
        /// Bearer token (omit to send no Authorization header)
        #[arg(short, long)]
        token: Option<String>,
        /// Declared content type
        #[arg(short, long, default_value = "image/jpeg")]
        mime: String,
    },
    /// Run the reference scenarios against a running gateway
    Scenarios {
        /// Bearer token the gateway was configured with
        #[arg(short, long)]
        token: String,
        /// Rate limit configured on the gateway
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
}

/// A fake JPEG: SOI marker followed by zeros.
fn dummy_image() -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8];
    bytes.extend(std::iter::repeat(0u8).take(1000));
    bytes
}

const BAD_FILE: &[u8] = b"This is not an image, it is a malicious text file.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Predict { file, token, mime } => {
            let data = std::fs::read(&file)?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            let res = predict(&client, &cli.url, token.as_deref(), name, data, &mime).await?;
            print_response(res).await?;
        }
        Commands::Scenarios { token, limit } => {
            let mut failures = 0;

            failures += scenario(&client, &cli.url, "No token", None, dummy_image(), "image/jpeg", 401).await?;
            failures += scenario(
                &client,
                &cli.url,
                "Invalid file type (TXT)",
                Some(&token),
                BAD_FILE.to_vec(),
                "text/plain",
                415,
            )
            .await?;
            failures += scenario(&client, &cli.url, "Legitimate user", Some(&token), dummy_image(), "image/jpeg", 200).await?;

            // The TXT and legitimate requests both passed authentication,
            // so both hold a rate-limit slot.
            let used = 2;
            println!("\n--- Stress test (rate limit) ---");
            for i in 1..=limit + 1 {
                let expected = expected_burst_status(i, used, limit);
                let label = format!("Rapid request #{}", i);
                failures += scenario(&client, &cli.url, &label, Some(&token), dummy_image(), "image/jpeg", expected).await?;
            }

            if failures > 0 {
                eprintln!("\n{} scenario(s) failed", failures);
                std::process::exit(1);
            }
            println!("\nAll scenarios passed");
        }
    }

    Ok(())
}

/// Status expected for the `i`-th rapid request when `used` slots are
/// already taken in the window.
fn expected_burst_status(i: usize, used: usize, limit: usize) -> u16 {
    if i + used > limit {
        429
    } else {
        200
    }
}

async fn predict(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    filename: String,
    data: Vec<u8>,
    mime: &str,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", token))?);
    }
    let part = Part::bytes(data).file_name(filename).mime_str(mime)?;
    let form = Form::new().part("file", part);

    Ok(client
        .post(format!("{}/predict", url))
        .headers(headers)
        .multipart(form)
        .send()
        .await?)
}

/// Returns 1 on failure, 0 on success.
async fn scenario(
    client: &reqwest::Client,
    url: &str,
    name: &str,
    token: Option<&str>,
    data: Vec<u8>,
    mime: &str,
    expected: u16,
) -> Result<usize, Box<dyn std::error::Error>> {
    println!("\n--- {} ---", name);
    let res = predict(client, url, token, "test_img.jpg".to_string(), data, mime).await?;
    let status = res.status().as_u16();
    let body: Value = res.json().await.unwrap_or(Value::Null);

    println!("   Status: {}", status);
    println!("   Response: {}", body);
    if status == expected {
        println!("   PASS");
        Ok(0)
    } else {
        println!("   FAIL (expected {}, got {})", expected, status);
        Ok(1)
    }
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let json: Value = res.json().await?;
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
    }
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
