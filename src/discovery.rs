//! 디스커버리 클라이언트
//!
//! 프로브 하나를 보내고 고정된 수집 창 동안 응답을 모은다. 창이 닫히면
//! 관측한 `(이름, 주소)`를 호스트 레지스트리에 반영한다.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::message::{PeerIdentity, DISCOVERY_PROBE};
use crate::registry::HostRegistry;
use crate::{Config, Error, Result};

/// 디스커버리 클라이언트
pub struct DiscoveryClient {
    config: Config,
    registry: Arc<HostRegistry>,
}

impl DiscoveryClient {
    pub fn new(config: Config, registry: Arc<HostRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    /// 설정된 수집 창으로 디스커버리 한 라운드 실행
    pub async fn discover(&self) -> Result<Vec<PeerIdentity>> {
        self.discover_within(self.config.discovery_timeout()).await
    }

    /// 디스커버리 한 라운드
    ///
    /// 응답이 없으면 수집 창이 끝난 뒤 빈 목록을 돌려준다. 같은 이름의 응답은
    /// 하나로 합치고 나중 주소를 쓴다. 결과는 처음 응답한 순서.
    /// 프로브 전송 자체가 실패한 경우에만 에러.
    pub async fn discover_within(&self, window: Duration) -> Result<Vec<PeerIdentity>> {
        let target = SocketAddr::from((self.config.multicast_group, self.config.multicast_port));

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| Error::connection(target, e))?;
        if self.config.multicast_group.is_multicast() {
            socket.set_multicast_ttl_v4(self.config.multicast_ttl)?;
        }

        let deadline = tokio::time::Instant::now() + window;
        socket
            .send_to(DISCOVERY_PROBE, target)
            .await
            .map_err(|e| Error::connection(target, e))?;
        debug!("Probe sent to {}, collecting for {:?}", target, window);

        let mut peers: Vec<PeerIdentity> = Vec::new();
        let mut index_by_name: HashMap<String, usize> = HashMap::new();
        let mut buf = [0u8; 1024];

        loop {
            let (len, from) =
                match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                    Err(_) => break,
                    Ok(Ok(received)) => received,
                    Ok(Err(e)) => {
                        debug!("디스커버리 수신 에러: {}", e);
                        continue;
                    }
                };

            let Some(peer) = PeerIdentity::from_reply(&buf[..len]) else {
                debug!("알 수 없는 디스커버리 응답 무시 ({}, {} bytes)", from, len);
                continue;
            };

            match index_by_name.get(&peer.name) {
                Some(&idx) => peers[idx].address = peer.address,
                None => {
                    index_by_name.insert(peer.name.clone(), peers.len());
                    peers.push(peer);
                }
            }
        }

        info!("Discovery round finished: {} peers", peers.len());

        if !peers.is_empty() {
            self.reconcile(&peers).await;
        }

        Ok(peers)
    }

    /// 레지스트리 반영. 실패는 로그만 남긴다 (디스커버리 결과는 유효).
    async fn reconcile(&self, peers: &[PeerIdentity]) {
        let registry = self.registry.clone();
        let observations: Vec<_> = peers.iter().map(|p| (p.name.clone(), p.address)).collect();

        match tokio::task::spawn_blocking(move || registry.reconcile(observations)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(updated)) => debug!("레지스트리 갱신: {} hosts", updated),
            Ok(Err(e)) => warn!("레지스트리 갱신 실패: {}", e),
            Err(e) => warn!("레지스트리 갱신 태스크 실패: {}", e),
        }
    }
}
