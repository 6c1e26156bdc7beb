//! The dialect table: every known way of expressing each intent.
//!
//! Decoders on the wall come from different firmware lines and nobody knows
//! in advance which control surface a given unit answers on. Each intent kind
//! therefore has an ordered list of candidates, each a transport, a builder
//! that renders the intent for that transport, and a predicate that decides
//! whether the reply means "accepted". The resolver walks the list in order.
//!
//! | Intent | Binary | HTTP | Line session |
//! |--------|--------|------|--------------|
//! | switch | 3 frames | 4 paths | 9 spellings |
//! | set-crop | none | 3 paths | 8 spellings |
//! | clear-crop | none | 2 paths | 8 spellings |
//!
//! Adding a spelling is adding a row; the resolver does not change.

use std::fmt;
use std::net::Ipv4Addr;

use videowall_core::geometry::CropRegion;
use videowall_core::intent::{DeviceIntent, IntentKind};

use crate::device::transport::hex;

/// Control surface a dialect speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Framed bytes on the control port.
    Binary,
    /// `GET` requests on the HTTP port.
    Http,
    /// Command lines in an authenticated session on the terminal port.
    LineSession,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Binary => write!(f, "BINARY"),
            Transport::Http => write!(f, "HTTP"),
            Transport::LineSession => write!(f, "TELNET"),
        }
    }
}

/// An intent rendered for one transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Frame(Vec<u8>),
    /// Path and query of a `GET`.
    Get(String),
    Line(String),
}

/// Reply tokens that mean a line-session command worked.
pub const SUCCESS_TOKENS: &[&str] = &["ok", "success", "done", "accepted", "connected"];

/// Reply tokens that veto a line-session success token.
pub const FAILURE_TOKENS: &[&str] = &["error", "fail", "invalid", "unknown", "denied"];

const HTTP_SUCCESS_TOKENS: &[&str] = &["ok", "success"];

/// Decides whether a reply means the device accepted the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Any reply at all.
    NonEmpty,
    /// Some success token appears and no failure token does. Matching is
    /// case-insensitive on substrings.
    Tokens {
        success: &'static [&'static str],
        failure: &'static [&'static str],
    },
}

impl Acceptance {
    pub fn accepts(&self, reply: &[u8]) -> bool {
        match self {
            Acceptance::NonEmpty => !reply.is_empty(),
            Acceptance::Tokens { success, failure } => {
                let text = String::from_utf8_lossy(reply).to_lowercase();
                success.iter().any(|t| text.contains(t)) && !failure.iter().any(|t| text.contains(t))
            }
        }
    }
}

const HTTP_OK: Acceptance = Acceptance::Tokens {
    success: HTTP_SUCCESS_TOKENS,
    failure: &[],
};

const LINE_OK: Acceptance = Acceptance::Tokens {
    success: SUCCESS_TOKENS,
    failure: FAILURE_TOKENS,
};

// Stream players print their own diagnostics, which often contain "error"
// even when the stream starts.
const LINE_PLAYER_OK: Acceptance = Acceptance::Tokens {
    success: SUCCESS_TOKENS,
    failure: &[],
};

/// One row of the table.
#[derive(Debug, Clone, Copy)]
pub struct Dialect {
    pub transport: Transport,
    pub build: fn(&DeviceIntent) -> Option<Payload>,
    pub acceptance: Acceptance,
}

macro_rules! dialect {
    ($transport:ident, $acceptance:expr, |$intent:ident| $body:expr) => {
        Dialect {
            transport: Transport::$transport,
            acceptance: $acceptance,
            build: |$intent: &DeviceIntent| $body,
        }
    };
}

/// Source address and RTSP URL of a switch.
fn switch_args(intent: &DeviceIntent) -> Option<(Ipv4Addr, String)> {
    match intent {
        DeviceIntent::Switch { source, .. } => Some((source.address, source.rtsp_url())),
        _ => None,
    }
}

fn crop_args(intent: &DeviceIntent) -> Option<CropRegion> {
    match intent {
        DeviceIntent::SetCrop { region, .. } => Some(*region),
        _ => None,
    }
}

fn clear_args(intent: &DeviceIntent) -> Option<()> {
    matches!(intent, DeviceIntent::ClearCrop { .. }).then_some(())
}

fn frame(prefix: &[u8], ip: Ipv4Addr, suffix: &[u8]) -> Payload {
    let mut bytes = Vec::with_capacity(prefix.len() + 4 + suffix.len());
    bytes.extend_from_slice(prefix);
    bytes.extend_from_slice(&ip.octets());
    bytes.extend_from_slice(suffix);
    Payload::Frame(bytes)
}

static SWITCH: &[Dialect] = &[
    dialect!(Binary, Acceptance::NonEmpty, |i| switch_args(i)
        .map(|(ip, _)| frame(&[0x00, 0x01], ip, &[0x00, 0x00]))),
    dialect!(Binary, Acceptance::NonEmpty, |i| switch_args(i)
        .map(|(ip, _)| frame(&[0x01, 0x00], ip, &[0x00, 0x00]))),
    dialect!(Binary, Acceptance::NonEmpty, |i| switch_args(i)
        .map(|(ip, _)| frame(&[0x01], ip, &[0x00]))),
    dialect!(Http, HTTP_OK, |i| switch_args(i)
        .map(|(ip, _)| Payload::Get(format!("/switch?ip={}", ip)))),
    dialect!(Http, HTTP_OK, |i| switch_args(i)
        .map(|(ip, _)| Payload::Get(format!("/api/switch?source={}", ip)))),
    dialect!(Http, HTTP_OK, |i| switch_args(i)
        .map(|(ip, _)| Payload::Get(format!("/source?ip={}", ip)))),
    dialect!(Http, HTTP_OK, |i| switch_args(i)
        .map(|(ip, _)| Payload::Get(format!("/set?source={}", ip)))),
    dialect!(LineSession, LINE_OK, |i| switch_args(i)
        .map(|(ip, _)| Payload::Line(format!("switch {}", ip)))),
    dialect!(LineSession, LINE_OK, |i| switch_args(i)
        .map(|(ip, _)| Payload::Line(format!("source {}", ip)))),
    dialect!(LineSession, LINE_OK, |i| switch_args(i)
        .map(|(ip, _)| Payload::Line(format!("SOURCE {}", ip)))),
    dialect!(LineSession, LINE_OK, |i| switch_args(i)
        .map(|(ip, _)| Payload::Line(format!("set source {}", ip)))),
    dialect!(LineSession, LINE_OK, |i| switch_args(i)
        .map(|(ip, _)| Payload::Line(format!("input {}", ip)))),
    dialect!(LineSession, LINE_OK, |i| switch_args(i)
        .map(|(ip, _)| Payload::Line(format!("decoder switch {}", ip)))),
    dialect!(LineSession, LINE_PLAYER_OK, |i| switch_args(i)
        .map(|(_, url)| Payload::Line(format!("play {}", url)))),
    dialect!(LineSession, LINE_PLAYER_OK, |i| switch_args(i)
        .map(|(_, url)| Payload::Line(format!("stream {}", url)))),
    dialect!(LineSession, LINE_PLAYER_OK, |i| switch_args(i)
        .map(|(_, url)| Payload::Line(format!("url {}", url)))),
];

static SET_CROP: &[Dialect] = &[
    dialect!(Http, HTTP_OK, |i| crop_args(i).map(|r| Payload::Get(format!(
        "/crop?x={}&y={}&w={}&h={}",
        r.x, r.y, r.width, r.height
    )))),
    dialect!(Http, HTTP_OK, |i| crop_args(i).map(|r| Payload::Get(format!(
        "/api/crop?x={}&y={}&width={}&height={}",
        r.x, r.y, r.width, r.height
    )))),
    dialect!(Http, HTTP_OK, |i| crop_args(i).map(|r| Payload::Get(format!(
        "/set?crop={},{},{},{}",
        r.x, r.y, r.width, r.height
    )))),
    dialect!(LineSession, LINE_OK, |i| crop_args(i).map(|r| Payload::Line(format!(
        "crop {} {} {} {}",
        r.x, r.y, r.width, r.height
    )))),
    dialect!(LineSession, LINE_OK, |i| crop_args(i).map(|r| Payload::Line(format!(
        "CROP {} {} {} {}",
        r.x, r.y, r.width, r.height
    )))),
    dialect!(LineSession, LINE_OK, |i| crop_args(i).map(|r| Payload::Line(format!(
        "set crop {} {} {} {}",
        r.x, r.y, r.width, r.height
    )))),
    dialect!(LineSession, LINE_OK, |i| crop_args(i).map(|r| Payload::Line(format!(
        "crop {},{},{},{}",
        r.x, r.y, r.width, r.height
    )))),
    dialect!(LineSession, LINE_OK, |i| crop_args(i).map(|r| Payload::Line(format!(
        "window {} {} {} {}",
        r.x, r.y, r.width, r.height
    )))),
    dialect!(LineSession, LINE_OK, |i| crop_args(i).map(|r| Payload::Line(format!(
        "roi {} {} {} {}",
        r.x, r.y, r.width, r.height
    )))),
    dialect!(LineSession, LINE_OK, |i| crop_args(i).map(|r| Payload::Line(format!(
        "scale {} {} {} {}",
        r.x, r.y, r.width, r.height
    )))),
    dialect!(LineSession, LINE_OK, |i| crop_args(i).map(|r| Payload::Line(format!(
        "zoom {} {} {} {}",
        r.x, r.y, r.width, r.height
    )))),
];

static CLEAR_CROP: &[Dialect] = &[
    dialect!(Http, HTTP_OK, |i| clear_args(i).map(|_| Payload::Get("/crop?reset=1".into()))),
    dialect!(Http, HTTP_OK, |i| clear_args(i).map(|_| Payload::Get("/api/crop?enable=0".into()))),
    dialect!(LineSession, LINE_OK, |i| clear_args(i).map(|_| Payload::Line("crop reset".into()))),
    dialect!(LineSession, LINE_OK, |i| clear_args(i).map(|_| Payload::Line("crop off".into()))),
    dialect!(LineSession, LINE_OK, |i| clear_args(i).map(|_| Payload::Line("CROP RESET".into()))),
    dialect!(LineSession, LINE_OK, |i| clear_args(i).map(|_| Payload::Line("crop clear".into()))),
    dialect!(LineSession, LINE_OK, |i| clear_args(i).map(|_| Payload::Line("set crop off".into()))),
    dialect!(LineSession, LINE_OK, |i| clear_args(i).map(|_| Payload::Line("roi reset".into()))),
    dialect!(LineSession, LINE_OK, |i| clear_args(i).map(|_| Payload::Line("window reset".into()))),
    dialect!(LineSession, LINE_OK, |i| clear_args(i).map(|_| Payload::Line("zoom reset".into()))),
];

/// The ordered dialect list for an intent kind.
pub fn table(kind: IntentKind) -> &'static [Dialect] {
    match kind {
        IntentKind::Switch => SWITCH,
        IntentKind::SetCrop => SET_CROP,
        IntentKind::ClearCrop => CLEAR_CROP,
    }
}

/// A dialect applied to a concrete intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Row in [`table`], stable across calls.
    pub index: usize,
    pub transport: Transport,
    pub payload: Payload,
    pub acceptance: Acceptance,
}

impl Candidate {
    /// How the attempt is named in the activity log and in reports.
    pub fn describe(&self, port: u16) -> String {
        match &self.payload {
            Payload::Frame(bytes) => format!("{}:{}:{}", self.transport, port, hex(bytes)),
            Payload::Get(path) => format!("{}:{}{}", self.transport, port, path),
            Payload::Line(line) => format!("{}:{}", self.transport, line),
        }
    }
}

/// Render an intent through its table, in order.
pub fn candidates(intent: &DeviceIntent) -> Vec<Candidate> {
    table(intent.kind())
        .iter()
        .enumerate()
        .filter_map(|(index, dialect)| {
            (dialect.build)(intent).map(|payload| Candidate {
                index,
                transport: dialect.transport,
                payload,
                acceptance: dialect.acceptance,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use videowall_core::intent::{DeviceEndpoint, SourceEndpoint};

    fn target() -> DeviceEndpoint {
        DeviceEndpoint {
            address: Ipv4Addr::new(172, 16, 207, 11),
            control_port: 48686,
            http_port: 8001,
            terminal_port: 23,
        }
    }

    fn switch() -> DeviceIntent {
        DeviceIntent::Switch {
            target: target(),
            source: SourceEndpoint {
                address: Ipv4Addr::new(172, 16, 207, 75),
                rtsp_port: 551,
                stream_path: "2160".into(),
            },
        }
    }

    fn count(candidates: &[Candidate], transport: Transport) -> usize {
        candidates.iter().filter(|c| c.transport == transport).count()
    }

    #[test]
    fn test_switch_candidates_in_transport_order() {
        let candidates = candidates(&switch());
        assert_eq!(count(&candidates, Transport::Binary), 3);
        assert_eq!(count(&candidates, Transport::Http), 4);
        assert_eq!(count(&candidates, Transport::LineSession), 9);

        let order: Vec<_> = candidates.iter().map(|c| c.transport).collect();
        let mut sorted = order.clone();
        sorted.sort_by_key(|t| match t {
            Transport::Binary => 0,
            Transport::Http => 1,
            Transport::LineSession => 2,
        });
        assert_eq!(order, sorted);
    }

    #[test]
    fn test_switch_frames_carry_source_address() {
        let candidates = candidates(&switch());
        assert_eq!(
            candidates[0].payload,
            Payload::Frame(vec![0x00, 0x01, 172, 16, 207, 75, 0x00, 0x00])
        );
        assert_eq!(
            candidates[1].payload,
            Payload::Frame(vec![0x01, 0x00, 172, 16, 207, 75, 0x00, 0x00])
        );
        assert_eq!(
            candidates[2].payload,
            Payload::Frame(vec![0x01, 172, 16, 207, 75, 0x00])
        );
        assert!(candidates.contains(&Candidate {
            index: 13,
            transport: Transport::LineSession,
            payload: Payload::Line("play rtsp://172.16.207.75:551/2160".into()),
            acceptance: LINE_PLAYER_OK,
        }));
    }

    #[test]
    fn test_crop_candidates_skip_binary() {
        let intent = DeviceIntent::SetCrop {
            target: target(),
            region: CropRegion::new(960, 0, 960, 540, 1920, 1080),
        };
        let candidates = candidates(&intent);
        assert_eq!(count(&candidates, Transport::Binary), 0);
        assert_eq!(count(&candidates, Transport::Http), 3);
        assert_eq!(count(&candidates, Transport::LineSession), 8);
        assert_eq!(
            candidates[0].payload,
            Payload::Get("/crop?x=960&y=0&w=960&h=540".into())
        );
        assert_eq!(candidates[3].payload, Payload::Line("crop 960 0 960 540".into()));

        let clear = candidates_for_clear();
        assert_eq!(count(&clear, Transport::Http), 2);
        assert_eq!(count(&clear, Transport::LineSession), 8);
    }

    fn candidates_for_clear() -> Vec<Candidate> {
        candidates(&DeviceIntent::ClearCrop { target: target() })
    }

    #[test]
    fn test_describe_names_transport_and_command() {
        let candidates = candidates(&switch());
        assert_eq!(candidates[0].describe(48686), "BINARY:48686:0001ac10cf4b0000");
        assert_eq!(candidates[3].describe(8001), "HTTP:8001/switch?ip=172.16.207.75");
        assert_eq!(candidates[7].describe(23), "TELNET:switch 172.16.207.75");
    }

    #[test]
    fn test_token_acceptance() {
        assert!(LINE_OK.accepts(b"Ok\r\n> "));
        assert!(LINE_OK.accepts(b"switch done"));
        assert!(!LINE_OK.accepts(b"ERROR: unknown command, ok?"));
        assert!(!LINE_OK.accepts(b"> "));
        assert!(LINE_PLAYER_OK.accepts(b"connected, decoder error recovered"));
        assert!(HTTP_OK.accepts(b"{\"result\":\"success\"}"));
        assert!(!HTTP_OK.accepts(b""));
        assert!(Acceptance::NonEmpty.accepts(&[0]));
        assert!(!Acceptance::NonEmpty.accepts(&[]));
    }
}
