//! The control-socket wire protocol: whitespace-tokenized text requests,
//! binary-packed (bincode) replies.

use crate::model::NodeSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    List { include_stopped: bool },
    Spawn {
        profile: String,
        clustername: String,
        n: i64,
        host: Option<String>,
    },
    StopNodes { nodeset: String },
    GetIp { nodeset: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("empty request")]
    Empty,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}'")]
    Arity(&'static str),
    #[error("'{0}' is not a valid bool (expected True/False)")]
    BadBool(String),
    #[error("'{0}' is not a valid integer")]
    BadInt(String),
    #[error("bincode encode/decode error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Parses one whitespace-split request line.
pub fn parse_request(line: &str) -> Result<Request, WireError> {
    let mut tokens = line.split_whitespace();
    let cmd = tokens.next().ok_or(WireError::Empty)?;
    let rest: Vec<&str> = tokens.collect();

    match cmd {
        "list" => {
            let [b] = rest[..] else {
                return Err(WireError::Arity("list"));
            };
            Ok(Request::List {
                include_stopped: parse_bool(b)?,
            })
        }
        "spawn" => {
            let [profile, clustername, n, host] = rest[..] else {
                return Err(WireError::Arity("spawn"));
            };
            let n: i64 = n.parse().map_err(|_| WireError::BadInt(n.to_string()))?;
            let host = if host == "None" {
                None
            } else {
                Some(host.to_string())
            };
            Ok(Request::Spawn {
                profile: profile.to_string(),
                clustername: clustername.to_string(),
                n,
                host,
            })
        }
        "stop_nodes" => {
            let [nodeset] = rest[..] else {
                return Err(WireError::Arity("stop_nodes"));
            };
            Ok(Request::StopNodes {
                nodeset: nodeset.to_string(),
            })
        }
        "get_ip" => {
            let [nodeset] = rest[..] else {
                return Err(WireError::Arity("get_ip"));
            };
            Ok(Request::GetIp {
                nodeset: nodeset.to_string(),
            })
        }
        other => Err(WireError::UnknownCommand(other.to_string())),
    }
}

fn parse_bool(s: &str) -> Result<bool, WireError> {
    match s {
        "True" => Ok(true),
        "False" => Ok(false),
        other => Err(WireError::BadBool(other.to_string())),
    }
}

/// The reply shapes from the per-command contract. `NodesetResult` covers
/// both `spawn` and `stop_nodes`, which share the same `(nodeset, errors)`
/// shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Reply {
    List(BTreeMap<String, Vec<NodeSnapshot>>),
    NodesetResult {
        nodeset: String,
        errors: Vec<String>,
    },
    IpList {
        ips: Vec<(String, String)>,
        errors: Vec<String>,
    },
    /// A whole-request error reported before any per-node work started
    /// (unknown profile, invalid nodeset, unmanaged host).
    Error(String),
}

pub fn encode_reply(reply: &Reply) -> Result<Vec<u8>, WireError> {
    Ok(bincode::serialize(reply)?)
}

pub fn decode_reply(bytes: &[u8]) -> Result<Reply, WireError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list() {
        assert_eq!(
            parse_request("list True").unwrap(),
            Request::List { include_stopped: true }
        );
    }

    #[test]
    fn parses_spawn_with_host() {
        assert_eq!(
            parse_request("spawn web-prof web 3 hostA").unwrap(),
            Request::Spawn {
                profile: "web-prof".to_string(),
                clustername: "web".to_string(),
                n: 3,
                host: Some("hostA".to_string()),
            }
        );
    }

    #[test]
    fn parses_spawn_with_none_host() {
        match parse_request("spawn web-prof web 3 None").unwrap() {
            Request::Spawn { host, .. } => assert_eq!(host, None),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_stop_nodes_and_get_ip() {
        assert_eq!(
            parse_request("stop_nodes web[1-2,9]").unwrap(),
            Request::StopNodes { nodeset: "web[1-2,9]".to_string() }
        );
        assert_eq!(
            parse_request("get_ip web0").unwrap(),
            Request::GetIp { nodeset: "web0".to_string() }
        );
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(matches!(parse_request("frobnicate x"), Err(WireError::UnknownCommand(_))));
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(matches!(parse_request("list"), Err(WireError::Arity("list"))));
    }

    #[test]
    fn reply_roundtrips_through_bincode() {
        let reply = Reply::NodesetResult {
            nodeset: "web[0-2]".to_string(),
            errors: vec![],
        };
        let bytes = encode_reply(&reply).unwrap();
        assert_eq!(decode_reply(&bytes).unwrap(), reply);
    }
}
