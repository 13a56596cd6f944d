//! # lanshare
//!
//! 중앙 서버 없이 로컬 네트워크의 피어를 찾고 공유 폴더의 파일을 주고받는다.
//!
//! ## 구성
//! - **디스커버리**: 멀티캐스트 프로브(`DISCOVER_P2P`) + `이름|IP` 유니캐스트 응답
//! - **호스트 레지스트리**: 발견한 `호스트명 → IP`를 파일에 캐시 (write-through)
//! - **전송 프로토콜**: TCP 위의 줄 단위 텍스트 요청 (`LIST_FILES`, `GET_FILE <name>`)
//! - **다운로드**: 응답 헤더 후 연결 종료까지 스트리밍, 0.5초 간격 처리율 보고
//!
//! 인증, 암호화, 이어받기, 무결성 검증은 없다.

pub mod catalog;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod message;
pub mod registry;
pub mod responder;
pub mod server;
pub mod stats;
pub mod supervisor;

use std::net::Ipv4Addr;

pub use catalog::FileCatalog;
pub use client::PeerClient;
pub use config::Config;
pub use discovery::DiscoveryClient;
pub use error::{Error, Result};
pub use message::{PeerIdentity, Request, Status};
pub use registry::{HostEntry, HostRegistry};
pub use responder::DiscoveryResponder;
pub use server::{ConnectionState, PeerServer, SessionInfo};
pub use stats::{Progress, TransferStats, TransferSummary};
pub use supervisor::{RestartPolicy, Supervisor, TaskKind, TaskState};

/// 기본 디스커버리 멀티캐스트 그룹
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 1, 1, 1);

/// 기본 디스커버리 포트
pub const DEFAULT_MULTICAST_PORT: u16 = 9999;

/// 기본 Peer Server 포트
pub const DEFAULT_PEER_PORT: u16 = 5000;

/// 기본 스트리밍 버퍼 크기 (바이트)
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// 기본 레지스트리 파일명
pub const REGISTRY_FILE_NAME: &str = "p2p_hosts.txt";
