use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facemesh_core::api::{
    RecognizeReply, RecognizeRequest, RegisterReply, RegisterRequest,
};
use facemesh_core::imaging::encode_data_url;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facemesh", about = "facemesh face registration and recognition CLI")]
struct Cli {
    /// Base URL of the facemeshd server
    #[arg(long, env = "FACEMESH_SERVER", default_value = "http://127.0.0.1:5000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the first face in an image under a name
    Register {
        /// Identity to register the face as
        #[arg(short, long)]
        name: String,
        /// Image file containing the face
        image: PathBuf,
    },
    /// Recognize every face in an image
    Recognize {
        /// Image file to search for faces
        image: PathBuf,
    },
    /// List registered identities
    List,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base = cli.server.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Register { name, image } => {
            let body = RegisterRequest {
                image: read_data_url(&image)?,
                name,
            };
            let reply: RegisterReply = post_json(&client, &format!("{base}/register"), &body).await?;
            println!("{}", reply.message);
            if !reply.success {
                std::process::exit(1);
            }
        }
        Commands::Recognize { image } => {
            let body = RecognizeRequest {
                image: read_data_url(&image)?,
            };
            let reply: RecognizeReply =
                post_json(&client, &format!("{base}/recognize"), &body).await?;
            if !reply.success {
                println!("{}", reply.message.unwrap_or_default());
                std::process::exit(1);
            }
            for face in reply.faces.unwrap_or_default() {
                let who = face.name.as_deref().unwrap_or("unknown");
                println!(
                    "{who:<20} {:>5.1}%  at ({}, {}) {}x{}",
                    face.confidence * 100.0,
                    face.x,
                    face.y,
                    face.width,
                    face.height
                );
            }
        }
        Commands::List => {
            let body = get_json(&client, &format!("{base}/faces")).await?;
            match body["names"].as_array() {
                Some(names) if !names.is_empty() => {
                    for name in names {
                        println!("{}", name.as_str().unwrap_or_default());
                    }
                }
                _ => println!("No faces registered"),
            }
        }
        Commands::Status => {
            let body = get_json(&client, &format!("{base}/status")).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

fn read_data_url(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "image loaded");
    Ok(encode_data_url(mime_for(path), &bytes))
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

async fn post_json<B, R>(client: &reqwest::Client, url: &str, body: &B) -> Result<R>
where
    B: serde::Serialize + ?Sized,
    R: serde::de::DeserializeOwned,
{
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .with_context(|| format!("connecting to {url}"))?;
    decode(resp, url).await
}

async fn get_json(client: &reqwest::Client, url: &str) -> Result<serde_json::Value> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("connecting to {url}"))?;
    decode(resp, url).await
}

async fn decode<R: serde::de::DeserializeOwned>(resp: reqwest::Response, url: &str) -> Result<R> {
    let status = resp.status();
    let text = resp.text().await.with_context(|| format!("reading reply from {url}"))?;
    match serde_json::from_str(&text) {
        Ok(value) => Ok(value),
        Err(_) if !status.is_success() => bail!("{url} returned {status}: {text}"),
        Err(err) => Err(err).with_context(|| format!("unexpected reply from {url}")),
    }
}
