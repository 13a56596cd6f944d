//! 노드 설정
//!
//! 프로세스 시작 시 한 번 만들어지고 각 컴포넌트 생성자에 값으로 전달된다.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_PORT, DEFAULT_PEER_PORT};

/// lanshare 노드 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 공유 폴더 경로 (목록/다운로드 대상, 다운로드 저장 위치)
    pub shared_dir: PathBuf,

    /// Peer Server 바인드 호스트
    #[serde(alias = "host")]
    pub bind_host: String,

    /// Peer Server 포트. 원격 피어 접속 시에도 같은 포트를 사용
    #[serde(alias = "port")]
    pub bind_port: u16,

    /// 디스커버리 응답에 실을 이름 (None이면 시스템 호스트명)
    pub node_name: Option<String>,

    /// 디스커버리 응답에 실을 주소 (None이면 자동 감지)
    pub advertise_ip: Option<IpAddr>,

    /// 디스커버리 멀티캐스트 그룹
    pub multicast_group: Ipv4Addr,

    /// 디스커버리 포트
    pub multicast_port: u16,

    /// 프로브 멀티캐스트 TTL (1 = 로컬 네트워크)
    pub multicast_ttl: u32,

    /// 디스커버리 수집 창 (밀리초)
    pub discovery_timeout_ms: u64,

    /// 접속 + 헤더 수신 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,

    /// 호스트 레지스트리 파일 경로
    pub registry_path: PathBuf,

    /// 스트리밍 버퍼 크기 (바이트)
    pub buffer_size: usize,

    /// 진행률 샘플 최소 간격 (밀리초)
    pub progress_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shared_dir: PathBuf::from("shared"),
            bind_host: "0.0.0.0".to_string(),
            bind_port: DEFAULT_PEER_PORT,
            node_name: None,
            advertise_ip: None,
            multicast_group: DEFAULT_MULTICAST_GROUP,
            multicast_port: DEFAULT_MULTICAST_PORT,
            multicast_ttl: 1,
            discovery_timeout_ms: 2000,     // 2초
            connect_timeout_ms: 5000,       // 5초
            registry_path: PathBuf::from(crate::REGISTRY_FILE_NAME),
            buffer_size: crate::DEFAULT_BUFFER_SIZE,
            progress_interval_ms: 500,      // 0.5초
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON 설정 파일 로드
    ///
    /// `shared_dir`, `host`, `port` 키를 가진 기존 config.json 형식을 그대로 읽는다.
    /// 없는 키는 기본값을 쓴다.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// 루프백 전용 설정 (테스트, 단일 머신 데모용)
    ///
    /// 임의 포트에 바인드하고 디스커버리는 유니캐스트 루프백으로 보낸다.
    pub fn local_test(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            shared_dir: dir.join("shared"),
            bind_host: "127.0.0.1".to_string(),
            bind_port: 0,
            node_name: Some("local".to_string()),
            advertise_ip: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            multicast_group: Ipv4Addr::LOCALHOST,
            multicast_port: 0,
            discovery_timeout_ms: 300,
            connect_timeout_ms: 2000,
            registry_path: dir.join(crate::REGISTRY_FILE_NAME),
            ..Self::default()
        }
    }

    /// Peer Server 바인드 주소 ("host:port")
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// 공유 폴더가 없으면 생성
    pub fn ensure_shared_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.shared_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_legacy_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"shared_dir": "/tmp/partage", "host": "0.0.0.0", "port": 6000}}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.shared_dir, PathBuf::from("/tmp/partage"));
        assert_eq!(config.bind_host, "0.0.0.0");
        assert_eq!(config.bind_port, 6000);
        // 나머지는 기본값
        assert_eq!(config.multicast_port, DEFAULT_MULTICAST_PORT);
        assert_eq!(config.progress_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));
        assert!(matches!(
            Config::load("/definitely/not/here.json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), format!("0.0.0.0:{}", DEFAULT_PEER_PORT));
    }
}
