//! Question and resource record entries

use super::name::{format_domain_name, parse_domain_name};
use super::rdata::RData;
use super::{DnsClass, DnsType};
use crate::packet::PacketBuffer;
use bytes::{BufMut, BytesMut};
use std::fmt;
use vproxy_core::{ByteArray, Error, Result};

fn truncated(what: &str, offset: usize) -> Error {
    Error::invalid_dns(format!("{} truncated at offset {}", what, offset))
}

/// A single question entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: DnsType,
    pub qclass: DnsClass,
}

impl Question {
    pub fn new(name: impl Into<String>, qtype: DnsType) -> Self {
        Question {
            name: name.into(),
            qtype,
            qclass: DnsClass::IN,
        }
    }

    /// Decode the entry at `*cursor` of `message`, advancing the cursor
    pub fn parse(message: &ByteArray, cursor: &mut usize) -> Result<Self> {
        let name = parse_domain_name(message, message, cursor)?;
        let at = *cursor;
        let qtype = message.uint16(at).map_err(|_| truncated("qtype", at))?;
        let qclass = message.uint16(at + 2).map_err(|_| truncated("qclass", at))?;
        *cursor += 4;
        Ok(Question {
            name,
            qtype: DnsType::from_u16(qtype),
            qclass: DnsClass::from_u16(qclass),
        })
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_slice(&format_domain_name(&self.name)?);
        buf.put_u16(self.qtype.to_u16());
        buf.put_u16(self.qclass.to_u16());
        Ok(())
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {} {}", self.name, self.qclass, self.qtype)
    }
}

/// A resource record of the answer, authority or additional section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub class: DnsClass,
    pub ttl: u32,
    pub rdata: RData,
}

impl ResourceRecord {
    pub fn new(name: impl Into<String>, ttl: u32, rdata: RData) -> Self {
        ResourceRecord {
            name: name.into(),
            class: DnsClass::IN,
            ttl,
            rdata,
        }
    }

    pub fn rtype(&self) -> DnsType {
        self.rdata.rtype()
    }

    /// Decode the record at `*cursor` of the message in `buf`, advancing the
    /// cursor past its rdata
    pub fn parse(buf: &PacketBuffer, cursor: &mut usize) -> Result<Self> {
        let message = buf.bytes();
        let name = parse_domain_name(message, message, cursor)?;
        let at = *cursor;
        let fixed = message.sub(at, 10).map_err(|_| truncated("resource record", at))?;
        let rtype = DnsType::from_u16(fixed.uint16(0)?);
        let class = DnsClass::from_u16(fixed.uint16(2)?);
        let ttl = fixed.uint32(4)?;
        let rdlength = fixed.uint16(8)? as usize;

        let rdata_buf = buf
            .sub_len(at + 10, rdlength)
            .map_err(|_| truncated("rdata", at + 10))?;
        let rdata = RData::parse(rtype, &rdata_buf)?;
        *cursor = at + 10 + rdlength;

        Ok(ResourceRecord {
            name,
            class,
            ttl,
            rdata,
        })
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        let rdata = self.rdata.to_bytes()?;
        let rdlength = u16::try_from(rdata.len())
            .map_err(|_| Error::encode(format!("rdata too long: {} bytes", rdata.len())))?;
        buf.put_slice(&format_domain_name(&self.name)?);
        buf.put_u16(self.rtype().to_u16());
        buf.put_u16(self.class.to_u16());
        buf.put_u32(self.ttl);
        buf.put_u16(rdlength);
        buf.put_slice(&rdata);
        Ok(())
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}. {} {} {} {}",
            self.name,
            self.ttl,
            self.class,
            self.rtype(),
            self.rdata
        )
    }
}
