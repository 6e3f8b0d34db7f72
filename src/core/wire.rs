/*!
 * Wire Protocol
 * Length-prefixed bincode records exchanged over the UNIX domain socket
 */

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::{Read, Write};

use super::errors::{TuneError, WireCode};
use super::types::{Handle, ResourceTuple, Tid};

/// Upper bound on a single wire frame; anything larger is rejected before
/// allocation.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024;

/// Client-issued request records.
///
/// The issuing thread id travels in the record; the owning pid comes from
/// the socket peer credentials and is never client-supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRequest {
    TuneResources {
        client_tid: Tid,
        resources: Vec<ResourceTuple>,
        duration_ms: i64,
        high_priority: bool,
    },
    TuneSignal {
        client_tid: Tid,
        sig_id: u16,
        sig_type: u32,
        /// 0 selects the signal's configured default timeout
        duration_ms: i64,
        high_priority: bool,
        app_name: Option<String>,
    },
    Retune {
        client_tid: Tid,
        handle: Handle,
        duration_ms: i64,
    },
    Untune {
        client_tid: Tid,
        handle: Handle,
    },
    GetProp {
        name: String,
    },
    SetProp {
        name: String,
        value: String,
    },
}

/// Server reply records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientResponse {
    Handle(Handle),
    Ok,
    Value(String),
    Error { code: WireCode, message: String },
}

impl ClientResponse {
    pub fn failure(err: &TuneError) -> Self {
        ClientResponse::Error {
            code: err.wire_code(),
            message: err.to_string(),
        }
    }
}

/// Serialize to binary bytes using bincode
#[inline]
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, TuneError> {
    bincode::serialize(value).map_err(|e| TuneError::Internal(format!("encode: {}", e)))
}

/// Deserialize from binary bytes using bincode
#[inline]
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TuneError> {
    bincode::deserialize(bytes).map_err(|e| TuneError::ArgInvalid(format!("decode: {}", e)))
}

/// Write one length-prefixed frame
pub fn write_frame<W: Write, T: Serialize>(w: &mut W, value: &T) -> Result<(), TuneError> {
    let payload = to_vec(value)?;
    if payload.len() as u32 > MAX_FRAME_BYTES {
        return Err(TuneError::ArgInvalid("frame too large".into()));
    }
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(&payload)?;
    w.flush()?;
    Ok(())
}

/// Read one length-prefixed frame. Returns `Ok(None)` on clean EOF at a
/// frame boundary.
pub fn read_frame<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<Option<T>, TuneError> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(TuneError::ArgInvalid(format!("frame of {} bytes", len)));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    from_slice(&payload).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let req = ClientRequest::TuneResources {
            client_tid: 1234,
            resources: vec![ResourceTuple {
                res_code: 0x0001_0002,
                res_info: 3,
                value: 800,
            }],
            duration_ms: 1000,
            high_priority: true,
        };
        let bytes = to_vec(&req).unwrap();
        let back: ClientRequest = from_slice(&bytes).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn test_frame_roundtrip() {
        let mut buf = Vec::new();
        let resp = ClientResponse::Handle(0xdead_beef_0000_0001);
        write_frame(&mut buf, &resp).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let back: ClientResponse = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(resp, back);

        // Second read hits clean EOF
        let eof: Option<ClientResponse> = read_frame(&mut cursor).unwrap();
        assert!(eof.is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_le_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let res: Result<Option<ClientResponse>, _> = read_frame(&mut cursor);
        assert!(res.is_err());
    }

    #[test]
    fn test_error_response_carries_wire_code() {
        let resp = ClientResponse::failure(&TuneError::Throttled);
        match resp {
            ClientResponse::Error { code, .. } => assert_eq!(code, WireCode::RateLimited),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
