use clap::{Parser, Subcommand};
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Client for the request-guard demo service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Header carrying the token in both directions
    #[arg(long, default_value = "Authorization")]
    header: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with a form post and print the issued token
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
        #[arg(long, default_value = "/login")]
        path: String,
    },
    /// GET a path, optionally presenting a token
    Get {
        path: String,
        #[arg(short, long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let header = HeaderName::from_bytes(cli.header.as_bytes())?;

    match cli.command {
        Commands::Login { username, password, path } => {
            let res = client
                .post(format!("{}{}", cli.url, path))
                .form(&[("username", username), ("password", password)])
                .send()
                .await?;
            let token = res.headers().get(&header).and_then(|v| v.to_str().ok()).map(str::to_string);
            print_response(res).await?;
            if let Some(token) = token {
                println!("{}: {}", header, token);
            }
        }
        Commands::Get { path, token } => {
            let mut req = client.get(format!("{}{}", cli.url, path));
            if let Some(token) = token {
                req = req.header(header.clone(), HeaderValue::from_str(&token)?);
            }
            let res = req.send().await?;
            if let Some(renewed) = res.headers().get(&header).and_then(|v| v.to_str().ok()) {
                eprintln!("Renewed {}: {}", header, renewed);
            }
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if let Some(retry_after) = res.headers().get(reqwest::header::RETRY_AFTER) {
        eprintln!("Retry-After: {}", retry_after.to_str().unwrap_or("?"));
    }
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: service returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
