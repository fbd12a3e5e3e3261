//! Envelope framing: module routing tag + length-delimited payload fields
//!
//! Integers are little-endian. Strings carry a u16 length prefix and
//! UTF-8 bytes; node ids travel as their raw 16 bytes.

use volta_core::{NodeId, Symbol, VoltaError, VoltaResult};

use crate::{
    ClockExchange, ClockExchangeResponse, DispatchState, OffsetTableEntry, Payload, PeerList,
    DISPATCH_STEPS,
};

/// Serialized size of one offset-table row
pub const TABLE_ENTRY_SIZE: usize = 16 + 8 + 8 + 8 + 8;

/// Module routing tag carried on every envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleTag {
    Clock,
    Dispatch,
    Group,
}

impl ModuleTag {
    /// Short name used in logs, matching the router registry
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleTag::Clock => "clk",
            ModuleTag::Dispatch => "dda",
            ModuleTag::Group => "gm",
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            ModuleTag::Clock => 0,
            ModuleTag::Dispatch => 1,
            ModuleTag::Group => 2,
        }
    }

    fn from_wire(byte: u8) -> VoltaResult<Self> {
        match byte {
            0 => Ok(ModuleTag::Clock),
            1 => Ok(ModuleTag::Dispatch),
            2 => Ok(ModuleTag::Group),
            other => Err(VoltaError::UnknownModuleTag(other)),
        }
    }
}

/// Typed envelope routed to one module of the receiving broker
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub module: ModuleTag,
    pub payload: Payload,
}

impl Envelope {
    pub fn clock(payload: Payload) -> Self {
        Envelope {
            module: ModuleTag::Clock,
            payload,
        }
    }

    pub fn dispatch(payload: Payload) -> Self {
        Envelope {
            module: ModuleTag::Dispatch,
            payload,
        }
    }

    pub fn group(payload: Payload) -> Self {
        Envelope {
            module: ModuleTag::Group,
            payload,
        }
    }

    /// Serialize to bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.push(self.module.to_wire());
        buf.push(self.payload.kind());
        match &self.payload {
            Payload::ClockExchange(msg) => {
                buf.extend_from_slice(&msg.query.to_le_bytes());
            }
            Payload::ClockExchangeResponse(msg) => {
                buf.extend_from_slice(&msg.response.to_le_bytes());
                write_str(&mut buf, &msg.unsynchronized_sendtime);
                buf.extend_from_slice(&(msg.table.len() as u16).to_le_bytes());
                for entry in &msg.table {
                    buf.extend_from_slice(&entry.node.to_bytes());
                    buf.extend_from_slice(&entry.offset_secs.to_le_bytes());
                    buf.extend_from_slice(&entry.offset_fracs.to_le_bytes());
                    buf.extend_from_slice(&entry.weight.to_le_bytes());
                    buf.extend_from_slice(&entry.skew.to_le_bytes());
                }
            }
            Payload::DispatchState(msg) => {
                buf.extend_from_slice(&msg.iteration.to_le_bytes());
                write_str(&mut buf, msg.symbol.as_str());
                for value in msg.delta_p.iter().chain(msg.lambda.iter()) {
                    buf.extend_from_slice(&value.to_le_bytes());
                }
            }
            Payload::PeerList(msg) => {
                buf.extend_from_slice(&(msg.peers.len() as u16).to_le_bytes());
                for peer in &msg.peers {
                    buf.extend_from_slice(&peer.to_bytes());
                }
            }
        }
        buf
    }

    /// Parse from bytes
    pub fn parse(buf: &[u8]) -> VoltaResult<Self> {
        let mut reader = Reader::new(buf);
        let module = ModuleTag::from_wire(reader.u8()?)?;
        let kind = reader.u8()?;
        let payload = match kind {
            0 => Payload::ClockExchange(ClockExchange {
                query: reader.u32()?,
            }),
            1 => {
                let response = reader.u32()?;
                let unsynchronized_sendtime = reader.string()?;
                let count = reader.u16()? as usize;
                let mut table = Vec::with_capacity(count);
                for _ in 0..count {
                    table.push(OffsetTableEntry {
                        node: reader.node_id()?,
                        offset_secs: reader.i64()?,
                        offset_fracs: reader.i64()?,
                        weight: reader.f64()?,
                        skew: reader.f64()?,
                    });
                }
                Payload::ClockExchangeResponse(ClockExchangeResponse {
                    response,
                    unsynchronized_sendtime,
                    table,
                })
            }
            2 => {
                let iteration = reader.u32()?;
                let symbol = Symbol::new(reader.string()?);
                let mut delta_p = [0.0; DISPATCH_STEPS];
                let mut lambda = [0.0; DISPATCH_STEPS];
                for slot in delta_p.iter_mut() {
                    *slot = reader.f64()?;
                }
                for slot in lambda.iter_mut() {
                    *slot = reader.f64()?;
                }
                Payload::DispatchState(DispatchState {
                    iteration,
                    symbol,
                    delta_p,
                    lambda,
                })
            }
            3 => {
                let count = reader.u16()? as usize;
                let mut peers = Vec::with_capacity(count);
                for _ in 0..count {
                    peers.push(reader.node_id()?);
                }
                Payload::PeerList(PeerList { peers })
            }
            other => return Err(VoltaError::UnknownPayloadKind(other)),
        };
        Ok(Envelope { module, payload })
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Bounds-checked cursor over an incoming buffer
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> VoltaResult<&'a [u8]> {
        if self.buf.len() < self.pos + len {
            return Err(VoltaError::BufferTooShort {
                expected: self.pos + len,
                actual: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> VoltaResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> VoltaResult<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> VoltaResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> VoltaResult<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> VoltaResult<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn node_id(&mut self) -> VoltaResult<NodeId> {
        Ok(NodeId::from_bytes(self.take(16)?.try_into().unwrap()))
    }

    fn string(&mut self) -> VoltaResult<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| VoltaError::InvalidWireFormat("string field is not UTF-8".into()))
    }
}
