//! 호스트 레지스트리
//!
//! 디스커버리로 알게 된 `호스트명 → IP` 매핑을 파일에 캐시한다.
//! 파일 형식은 `/etc/hosts`와 같은 `<ip> <hostname>` 줄 단위이며
//! 빈 줄과 `#` 주석은 무시한다.
//!
//! 파일 I/O는 동기식이고 파일 잠금은 없다. 재조정(reconcile)은 디스커버리
//! 클라이언트 하나만 호출한다고 가정한다.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// 레지스트리 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub ip: IpAddr,
    pub hostname: String,
}

/// 호스트 레지스트리
pub struct HostRegistry {
    /// 레지스트리 파일 경로
    path: PathBuf,

    /// 호스트명 → IP (호스트명당 하나)
    hosts: RwLock<BTreeMap<String, IpAddr>>,
}

impl HostRegistry {
    /// 레지스트리 파일 로드
    ///
    /// 파일이 없으면 빈 레지스트리로 시작한다. 읽을 수 없는 파일은 `Persistence` 에러.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let hosts = match std::fs::read_to_string(&path) {
            Ok(text) => parse_registry(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("레지스트리 파일 없음, 빈 상태로 시작: {:?}", path);
                BTreeMap::new()
            }
            Err(e) => return Err(Error::persistence(&path, e)),
        };

        debug!("레지스트리 로드: {} hosts from {:?}", hosts.len(), path);

        Ok(Self {
            path,
            hosts: RwLock::new(hosts),
        })
    }

    /// 파일을 읽지 않고 빈 레지스트리 생성
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hosts: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 레지스트리에 등록된 주소 조회
    pub fn get(&self, hostname: &str) -> Option<IpAddr> {
        self.hosts.read().get(hostname).copied()
    }

    /// 현재 항목 (호스트명 순)
    pub fn entries(&self) -> Vec<HostEntry> {
        self.hosts
            .read()
            .iter()
            .map(|(hostname, ip)| HostEntry {
                ip: *ip,
                hostname: hostname.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }

    /// 이름을 접속 가능한 주소 문자열로 해석
    ///
    /// 1. 레지스트리 조회
    /// 2. 시스템 이름 해석 (IPv4 우선)
    /// 3. 둘 다 실패하면 이름을 그대로 반환 (실패는 접속 시점으로 미룬다)
    pub async fn resolve(&self, name: &str) -> String {
        if let Some(ip) = self.get(name) {
            return ip.to_string();
        }

        match tokio::net::lookup_host((name, 0)).await {
            Ok(addrs) => {
                let addrs: Vec<_> = addrs.map(|a| a.ip()).collect();
                match addrs.iter().find(|ip| ip.is_ipv4()).or_else(|| addrs.first()) {
                    Some(ip) => ip.to_string(),
                    None => name.to_string(),
                }
            }
            Err(e) => {
                debug!("이름 해석 실패 ({}): {}", name, e);
                name.to_string()
            }
        }
    }

    /// 디스커버리 관측 결과 반영
    ///
    /// 새 호스트이거나 주소가 바뀐 관측만 갱신 대상이다. 갱신이 하나라도 있으면
    /// 병합된 전체 테이블을 임시 파일에 쓰고 rename으로 교체한 뒤 메모리에 반영한다.
    /// 반환값은 갱신된 호스트 수.
    pub fn reconcile<I, S>(&self, observations: I) -> Result<usize>
    where
        I: IntoIterator<Item = (S, IpAddr)>,
        S: Into<String>,
    {
        let mut hosts = self.hosts.write();

        let mut staged: BTreeMap<String, IpAddr> = BTreeMap::new();
        for (hostname, ip) in observations {
            let hostname = hostname.into();
            if hostname.is_empty() || hostname.contains(char::is_whitespace) {
                warn!("레지스트리에 쓸 수 없는 호스트명 무시: {:?}", hostname);
                continue;
            }
            if hosts.get(&hostname) != Some(&ip) {
                staged.insert(hostname, ip);
            }
        }

        if staged.is_empty() {
            return Ok(0);
        }

        let mut merged = hosts.clone();
        merged.extend(staged.iter().map(|(h, ip)| (h.clone(), *ip)));

        write_atomically(&self.path, &render_registry(&merged))?;
        *hosts = merged;

        for (hostname, ip) in &staged {
            info!("Registry updated: {} -> {}", hostname, ip);
        }

        Ok(staged.len())
    }
}

/// 레지스트리 텍스트 파싱 (뒤의 줄이 앞의 줄을 덮어씀)
fn parse_registry(text: &str) -> BTreeMap<String, IpAddr> {
    let mut hosts = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let (Some(ip), Some(hostname)) = (parts.next(), parts.next()) else {
            continue;
        };

        match ip.parse::<IpAddr>() {
            Ok(ip) => {
                hosts.insert(hostname.to_string(), ip);
            }
            Err(_) => warn!("레지스트리 줄 무시 (잘못된 IP): {:?}", line),
        }
    }

    hosts
}

fn render_registry(hosts: &BTreeMap<String, IpAddr>) -> String {
    hosts
        .iter()
        .map(|(hostname, ip)| format!("{} {}\n", ip, hostname))
        .collect()
}

/// 같은 디렉터리의 임시 파일에 쓴 뒤 rename
fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::persistence(path, e))?;
    }

    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents).map_err(|e| Error::persistence(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        Error::persistence(path, e)
    })
}
