//! lanshare 클라이언트
//!
//! 한 번 실행하고 끝나는 명령: 피어 찾기, 원격 목록, 다운로드
//!
//! 사용법:
//!   cargo run --release --bin lanshare-client -- [OPTIONS] <COMMAND>
//!
//! 예시:
//!   cargo run --release --bin lanshare-client -- discover
//!   cargo run --release --bin lanshare-client -- list bureau-pc
//!   cargo run --release --bin lanshare-client -- -d ./partage get bureau-pc rapport.pdf

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use lanshare::{Config, DiscoveryClient, HostRegistry, PeerClient, Progress};

enum Command {
    Discover,
    List { peer: String },
    Get { peer: String, filename: String },
}

fn usage() -> &'static str {
    r#"lanshare-client - LAN 파일 공유 클라이언트

사용법:
  cargo run --release --bin lanshare-client -- [OPTIONS] <COMMAND>

명령:
  discover                 로컬 네트워크의 피어 찾기
  list <PEER>              피어의 공유 파일 목록
  get <PEER> <FILE>        피어에서 파일을 공유 폴더로 다운로드

옵션:
  -c, --config <PATH>      JSON 설정 파일 (shared_dir, host, port)
  -d, --shared-dir <PATH>  공유 폴더 (다운로드 저장 위치)
  -p, --port <PORT>        피어 포트 (기본: 5000)
  -t, --timeout <MS>       디스커버리 수집 시간 (기본: 2000)
  --registry <PATH>        호스트 레지스트리 파일 (기본: p2p_hosts.txt)
  -h, --help               이 도움말 출력
"#
}

fn next_value(args: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| format!("{} 값 필요", flag))
}

fn parse_args() -> Result<(Config, Command), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let mut config = match args.iter().position(|a| a == "--config" || a == "-c") {
        Some(pos) => Config::load(args.get(pos + 1).ok_or("--config 값 필요")?)?,
        None => Config::default(),
    };
    let mut positional: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--config" | "-c" => {
                i += 1;
            }
            "--shared-dir" | "-d" => {
                config.shared_dir = PathBuf::from(next_value(&args, &mut i, flag)?);
            }
            "--port" | "-p" => {
                config.bind_port = next_value(&args, &mut i, flag)?.parse()?;
            }
            "--timeout" | "-t" => {
                config.discovery_timeout_ms = next_value(&args, &mut i, flag)?.parse()?;
            }
            "--registry" => {
                config.registry_path = PathBuf::from(next_value(&args, &mut i, flag)?);
            }
            "--help" | "-h" => {
                println!("{}", usage());
                std::process::exit(0);
            }
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    let command = match positional.as_slice() {
        [cmd] if cmd == "discover" => Command::Discover,
        [cmd, peer] if cmd == "list" => Command::List { peer: peer.clone() },
        [cmd, peer, filename] if cmd == "get" => Command::Get {
            peer: peer.clone(),
            filename: filename.clone(),
        },
        _ => return Err(usage().into()),
    };

    Ok((config, command))
}

fn print_progress(progress: Progress) {
    print!(
        "\rReceived: {:.1} KB | Speed: {:.1} KB/s",
        progress.bytes_so_far as f64 / 1024.0,
        progress.instantaneous_kbps
    );
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (진행률 출력과 섞이지 않게 기본 warn)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let (config, command) = parse_args()?;
    let registry = Arc::new(HostRegistry::load(&config.registry_path)?);

    match command {
        Command::Discover => {
            let peers = DiscoveryClient::new(config, registry).discover().await?;
            if peers.is_empty() {
                println!("No peers found.");
            }
            for (i, peer) in peers.iter().enumerate() {
                println!("  {}. {}", i + 1, peer);
            }
        }
        Command::List { peer } => {
            let files = PeerClient::new(config, registry).list_remote(&peer).await?;
            println!("Files shared by {}:", peer);
            for file in files {
                println!("  - {}", file);
            }
        }
        Command::Get { peer, filename } => {
            let client = PeerClient::new(config, registry);
            let summary = client
                .fetch_with_progress(&peer, &filename, print_progress)
                .await;
            println!();
            let summary = summary?;
            println!("[OK] {}", summary.summary());
        }
    }

    Ok(())
}
