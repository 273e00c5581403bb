#![allow(dead_code)]

use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub fn random_payload(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill(&mut data[..]);
    data
}

pub fn sha256(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Serves `payload` and honours `Range: bytes=a-b` requests.
///
/// Ranges containing `fail_at` get a 500. Every ranged GET is recorded.
#[derive(Clone)]
pub struct RangeServer {
    payload: Arc<Vec<u8>>,
    fail_at: Option<u64>,
    requests: Arc<Mutex<HashMap<(u64, u64), usize>>>,
}

impl RangeServer {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload: Arc::new(payload),
            fail_at: None,
            requests: Arc::default(),
        }
    }

    pub fn failing_at(mut self, offset: u64) -> Self {
        self.fail_at = Some(offset);
        self
    }

    /// Number of GETs received per inclusive `(first, last)` range.
    pub fn requests(&self) -> HashMap<(u64, u64), usize> {
        self.requests.lock().unwrap().clone()
    }

    pub fn total_ranged_requests(&self) -> usize {
        self.requests().values().sum()
    }

    fn parse_range(value: &str) -> Option<(u64, u64)> {
        let spec = value.strip_prefix("bytes=")?;
        let (first, last) = spec.split_once('-')?;
        Some((first.parse().ok()?, last.parse().ok()?))
    }
}

impl Respond for RangeServer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some(raw) = request.headers.get("range") else {
            return ResponseTemplate::new(200).set_body_bytes(self.payload.as_slice());
        };
        let Some((first, last)) = raw.to_str().ok().and_then(Self::parse_range) else {
            return ResponseTemplate::new(416);
        };
        *self.requests.lock().unwrap().entry((first, last)).or_default() += 1;

        let len = self.payload.len() as u64;
        if first > last || first >= len {
            return ResponseTemplate::new(416);
        }
        if self.fail_at.is_some_and(|at| (first..=last).contains(&at)) {
            return ResponseTemplate::new(500);
        }
        let last = last.min(len - 1);
        ResponseTemplate::new(206)
            .insert_header("content-range", format!("bytes {first}-{last}/{len}").as_str())
            .set_body_bytes(&self.payload[first as usize..=last as usize])
    }
}

/// Mounts HEAD and GET handlers for `route` on `server`.
pub async fn mount(server: &MockServer, route: &str, accept_ranges: &str, responder: RangeServer) {
    let len = responder.payload.len().to_string();
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("accept-ranges", accept_ranges)
                .insert_header("content-length", len.as_str())
                .set_body_bytes(responder.payload.as_slice()),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(responder)
        .mount(server)
        .await;
}
