//! lanshare 노드
//!
//! Peer Server + Discovery Responder를 띄우고 Ctrl-C까지 실행한다.
//!
//! 사용법:
//!   cargo run --release --bin lanshare-node -- [OPTIONS]
//!
//! 예시:
//!   # config.json 사용
//!   cargo run --release --bin lanshare-node -- --config config.json
//!
//!   # 공유 폴더와 포트 지정
//!   cargo run --release --bin lanshare-node -- -d ./partage -p 5001

use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

use lanshare::{Config, RestartPolicy, Supervisor};

/// 노드 실행 옵션
struct NodeArgs {
    config: Config,
    restart: bool,
}

fn next_value(args: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| format!("{} 값 필요", flag))
}

fn parse_args() -> Result<NodeArgs, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    // --config가 있으면 먼저 로드하고 나머지 옵션으로 덮어씀
    let mut config = match args.iter().position(|a| a == "--config" || a == "-c") {
        Some(pos) => {
            let path = args.get(pos + 1).ok_or("--config 값 필요")?;
            Config::load(path)?
        }
        None => Config::default(),
    };
    let mut restart = false;

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
            "--bind" | "-b" => {
                config.bind_host = next_value(&args, &mut i, flag)?;
            }
            "--port" | "-p" => {
                config.bind_port = next_value(&args, &mut i, flag)?.parse()?;
            }
            "--name" | "-n" => {
                config.node_name = Some(next_value(&args, &mut i, flag)?);
            }
            "--advertise" => {
                config.advertise_ip = Some(next_value(&args, &mut i, flag)?.parse()?);
            }
            "--registry" => {
                config.registry_path = PathBuf::from(next_value(&args, &mut i, flag)?);
            }
            "--restart" => {
                restart = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"lanshare-node - LAN 파일 공유 노드

Peer Server(TCP)와 Discovery Responder(멀티캐스트 UDP)를 함께 실행

사용법:
  cargo run --release --bin lanshare-node -- [OPTIONS]

옵션:
  -c, --config <PATH>      JSON 설정 파일 (shared_dir, host, port)
  -d, --shared-dir <PATH>  공유 폴더 (기본: ./shared)
  -b, --bind <HOST>        바인드 호스트 (기본: 0.0.0.0)
  -p, --port <PORT>        Peer Server 포트 (기본: 5000)
  -n, --name <NAME>        디스커버리 표시 이름 (기본: 호스트명)
  --advertise <IP>         디스커버리 응답 주소 (기본: 자동 감지)
  --registry <PATH>        호스트 레지스트리 파일 (기본: p2p_hosts.txt)
  --restart                태스크 종료 시 백오프 후 재시작
  -h, --help               이 도움말 출력

로그 레벨은 RUST_LOG로 조정 (기본: info)
"#
                );
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {}", other).into()),
        }
        i += 1;
    }

    Ok(NodeArgs { config, restart })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let NodeArgs { config, restart } = parse_args()?;

    info!("lanshare node starting...");
    info!("Shared directory: {:?}", config.shared_dir);
    info!("Peer server: {}", config.bind_addr());
    info!(
        "Discovery: {}:{}",
        config.multicast_group, config.multicast_port
    );

    let policy = if restart {
        RestartPolicy::lenient()
    } else {
        RestartPolicy::never()
    };
    let supervisor = Supervisor::new(config).with_policy(policy);

    supervisor
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Bye!");
    Ok(())
}
