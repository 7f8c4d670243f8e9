use tracing::{debug, warn};
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::config::ServerConfig;
use crate::logger::dump_candidate;
use crate::peer::types::Candidate;
use crate::utils::add_ice_url_scheme;

/// Конфигурация STUN серверов для webrtc-rs
pub fn rtc_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Локальные кандидаты одного согласования; после завершения сбора набор заморожен.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    gathered: Vec<Candidate>,
    complete: bool,
}

impl CandidateBuffer {
    pub fn push(&mut self, candidate: Candidate) {
        if self.complete {
            debug!("late candidate after gathering completed, dropping");
            return;
        }
        dump_candidate("LOCAL", &candidate);
        self.gathered.push(candidate);
        debug!("Added ICE candidate, total count: {}", self.gathered.len());
    }

    pub fn complete(&mut self) {
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.gathered
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub other: usize,
}

pub fn analyze_candidates(candidates: &[Candidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        match candidate.kind() {
            Some("host") => summary.host += 1,
            Some("srflx") => summary.srflx += 1,
            _ => summary.other += 1,
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} other",
        summary.host, summary.srflx, summary.other
    );

    // без relay единственный путь через NAT это srflx
    if summary.srflx == 0 {
        warn!("No server-reflexive candidates found! Connection across NAT may fail.");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_freezes_after_completion() {
        let mut buf = CandidateBuffer::default();
        buf.push(Candidate::new("candidate:1 1 udp 1 10.0.0.2 5000 typ host"));
        buf.complete();
        buf.push(Candidate::new("candidate:2 1 udp 1 10.0.0.2 5001 typ host"));
        assert!(buf.is_complete());
        assert_eq!(buf.candidates().len(), 1);
    }

    #[test]
    fn analysis_counts_types() {
        let summary = analyze_candidates(&[
            Candidate::new("candidate:1 1 udp 1 10.0.0.2 5000 typ host"),
            Candidate::new("candidate:2 1 udp 1 198.51.100.7 6000 typ srflx raddr 10.0.0.2 rport 5000"),
            Candidate::new("candidate:3 1 udp 1 10.0.0.2 5002 typ prflx"),
        ]);
        assert_eq!(summary, CandidateSummary { host: 1, srflx: 1, other: 1 });
    }

    #[test]
    fn stun_urls_get_scheme() {
        let servers = rtc_ice_servers(&[ServerConfig {
            id: "s".into(),
            r#type: "stun".into(),
            url: "stun.example.test:3478".into(),
            username: None,
            credential: None,
        }]);
        assert_eq!(servers[0].urls, vec!["stun:stun.example.test:3478".to_string()]);
        assert!(servers[0].username.is_empty());
    }
}
