//! 디스커버리 응답자
//!
//! 멀티캐스트 그룹에서 `DISCOVER_P2P` 프로브를 기다리다가 보낸 쪽 주소로
//! `<name>|<ip>`를 유니캐스트로 돌려준다. 다른 페이로드는 무시한다.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::message::{PeerIdentity, DISCOVERY_PROBE};
use crate::{Config, Error, Result};

/// 디스커버리 데이터그램 최대 크기
const MAX_DATAGRAM: usize = 1024;

/// 시스템 호스트명 (실패 시 "Unknown")
pub fn local_hostname() -> String {
    hostname::get().map_or_else(
        |_| "Unknown".to_string(),
        |h| h.to_string_lossy().to_string(),
    )
}

/// 로컬 네트워크 쪽 IPv4 주소 감지
///
/// 라우팅 불가 주소로 UDP connect만 해서 커널이 고른 출발 주소를 읽는다.
/// 패킷은 나가지 않는다. 실패하면 127.0.0.1.
pub async fn detect_local_ip() -> IpAddr {
    let probe = async {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1)).await?;
        socket.local_addr()
    };

    match probe.await {
        Ok(addr) if !addr.ip().is_unspecified() => addr.ip(),
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            debug!("로컬 IP 감지 실패, 루프백 사용: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// 주소 재사용 옵션을 켠 UDP 소켓 바인드 (tokio 소켓은 바인드 전 옵션 설정 불가)
fn bind_reusable(addr: SocketAddr) -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// 디스커버리 응답자
pub struct DiscoveryResponder {
    config: Config,
}

impl DiscoveryResponder {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// 응답에 실을 자기 정보
    ///
    /// 주소는 응답할 때마다 다시 감지한다 (DHCP 갱신 대응).
    pub async fn identity(&self) -> PeerIdentity {
        let name = self
            .config
            .node_name
            .clone()
            .unwrap_or_else(local_hostname);
        let address = match self.config.advertise_ip {
            Some(ip) => ip,
            None => detect_local_ip().await,
        };
        PeerIdentity::new(name, address)
    }

    /// 디스커버리 포트 바인드 + 그룹 가입
    ///
    /// 같은 호스트의 여러 노드가 포트를 공유하도록 SO_REUSEADDR(유닉스는 SO_REUSEPORT도)를
    /// 켠다. 그룹 가입에 실패해도 유니캐스트 프로브에는 계속 응답한다.
    pub async fn bind(&self) -> Result<UdpSocket> {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.multicast_port));
        let socket = bind_reusable(bind_addr)
            .and_then(UdpSocket::from_std)
            .map_err(|e| Error::connection(bind_addr, e))?;

        let group = self.config.multicast_group;
        if group.is_multicast() {
            if let Err(e) = socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
                warn!("멀티캐스트 그룹 가입 실패 ({}): {}", group, e);
            }
        }

        Ok(socket)
    }

    /// 바인드 후 응답 루프 실행 (반환하지 않음)
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let socket = self.bind().await?;
        self.serve(socket).await
    }

    /// 바인드 후 응답 루프를 백그라운드 태스크로 시작
    pub async fn start(self: Arc<Self>) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let socket = self.bind().await?;
        let local_addr = socket.local_addr()?;
        let handle = tokio::spawn(self.serve(socket));
        Ok((local_addr, handle))
    }

    /// 응답 루프
    pub async fn serve(self: Arc<Self>, socket: UdpSocket) -> Result<()> {
        info!(
            "Discovery responder listening on {} (group {})",
            socket.local_addr()?,
            self.config.multicast_group
        );

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                // 이전 send_to의 ICMP 에러가 보고되는 플랫폼
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if &buf[..len] != DISCOVERY_PROBE {
                continue;
            }

            let identity = self.identity().await;
            debug!("Probe from {}, replying {}", from, identity);

            if let Err(e) = socket.send_to(&identity.to_reply_bytes(), from).await {
                warn!("디스커버리 응답 전송 실패 ({}): {}", from, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn responder_config() -> Config {
        let dir = std::env::temp_dir();
        Config {
            node_name: Some("peer-a".to_string()),
            ..Config::local_test(dir)
        }
    }

    #[tokio::test]
    async fn test_identity_overrides() {
        let responder = DiscoveryResponder::new(responder_config());
        let identity = responder.identity().await;
        assert_eq!(identity.name, "peer-a");
        assert_eq!(identity.address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_identity_defaults() {
        let responder = DiscoveryResponder::new(Config::default());
        let identity = responder.identity().await;
        assert!(!identity.name.is_empty());
        assert!(identity.address.is_ipv4());
    }

    #[tokio::test]
    async fn test_replies_to_probe_only() {
        let responder = Arc::new(DiscoveryResponder::new(responder_config()));
        let (addr, _handle) = responder.start().await.unwrap();
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()));

        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let mut buf = [0u8; 256];

        // 다른 페이로드는 무시
        client.send_to(b"HELLO", target).await.unwrap();
        let ignored =
            tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
        assert!(ignored.is_err());

        client.send_to(DISCOVERY_PROBE, target).await.unwrap();
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("응답 없음")
            .unwrap();
        assert_eq!(&buf[..len], b"peer-a|127.0.0.1");
    }

    #[tokio::test]
    async fn test_two_responders_share_port() {
        let first = Arc::new(DiscoveryResponder::new(responder_config()));
        let (addr, _first_handle) = first.start().await.unwrap();

        // 같은 호스트의 두 번째 노드
        let second_config = Config {
            node_name: Some("peer-b".to_string()),
            multicast_port: addr.port(),
            ..Config::local_test(std::env::temp_dir())
        };
        let second = Arc::new(DiscoveryResponder::new(second_config));
        let (second_addr, _second_handle) = second.start().await.unwrap();
        assert_eq!(second_addr.port(), addr.port());

        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()));
        client.send_to(DISCOVERY_PROBE, target).await.unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("응답 없음")
            .unwrap();
        let reply = PeerIdentity::from_reply(&buf[..len]).unwrap();
        assert!(reply.name == "peer-a" || reply.name == "peer-b", "{}", reply);
    }
}
