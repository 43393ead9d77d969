//! Typed record data

use super::name::{format_domain_name, parse_domain_name};
use super::DnsType;
use crate::packet::PacketBuffer;
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use vproxy_core::{ByteArray, Error, Result};

/// Record data of a resource record
///
/// Types carrying domain names are decoded with their names expanded, so
/// re-encoding never leaves a compression pointer into a different message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    /// Canonical name; the name fills the whole field
    Cname(String),
    Ns(String),
    Ptr(String),
    Mx {
        preference: u16,
        exchange: String,
    },
    Soa {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    /// Any other type, kept as raw bytes
    Other { rtype: DnsType, data: ByteArray },
}

/// Sequential reader over one rdata field
struct Fields<'a> {
    buf: &'a PacketBuffer,
    cursor: usize,
    what: &'static str,
}

impl<'a> Fields<'a> {
    fn new(buf: &'a PacketBuffer, what: &'static str) -> Self {
        Fields {
            buf,
            cursor: 0,
            what,
        }
    }

    fn name(&mut self) -> Result<String> {
        parse_domain_name(self.buf.bytes(), self.buf.full(), &mut self.cursor)
    }

    fn u16(&mut self) -> Result<u16> {
        let val = self.buf.bytes().uint16(self.cursor).map_err(|_| self.truncated())?;
        self.cursor += 2;
        Ok(val)
    }

    fn u32(&mut self) -> Result<u32> {
        let val = self.buf.bytes().uint32(self.cursor).map_err(|_| self.truncated())?;
        self.cursor += 4;
        Ok(val)
    }

    fn truncated(&self) -> Error {
        Error::invalid_dns(format!(
            "{} rdata truncated at offset {}",
            self.what, self.cursor
        ))
    }

    /// The field must be consumed exactly
    fn finish<T: fmt::Display>(self, value: T) -> Result<T> {
        let len = self.buf.len();
        if self.cursor != len {
            return Err(Error::invalid_dns(format!(
                "more bytes readable in the {} rdata field: {}={}, data.len={}",
                self.what, self.what, value, len
            )));
        }
        Ok(value)
    }
}

impl RData {
    pub fn rtype(&self) -> DnsType {
        match self {
            RData::Cname(_) => DnsType::CNAME,
            RData::Ns(_) => DnsType::NS,
            RData::Ptr(_) => DnsType::PTR,
            RData::Mx { .. } => DnsType::MX,
            RData::Soa { .. } => DnsType::SOA,
            RData::Srv { .. } => DnsType::SRV,
            RData::A(_) => DnsType::A,
            RData::Aaaa(_) => DnsType::AAAA,
            RData::Other { rtype, .. } => *rtype,
        }
    }

    /// Decode the rdata window of `buf`; names resolve against `buf.full()`
    pub fn parse(rtype: DnsType, buf: &PacketBuffer) -> Result<Self> {
        let data = buf.bytes();
        match rtype {
            DnsType::CNAME => {
                let mut fields = Fields::new(buf, "cname");
                let cname = fields.name()?;
                fields.finish(RData::Cname(cname))
            }
            DnsType::NS => {
                let mut fields = Fields::new(buf, "ns");
                let host = fields.name()?;
                fields.finish(RData::Ns(host))
            }
            DnsType::PTR => {
                let mut fields = Fields::new(buf, "ptr");
                let host = fields.name()?;
                fields.finish(RData::Ptr(host))
            }
            DnsType::MX => {
                let mut fields = Fields::new(buf, "mx");
                let preference = fields.u16()?;
                let exchange = fields.name()?;
                fields.finish(RData::Mx {
                    preference,
                    exchange,
                })
            }
            DnsType::SOA => {
                let mut fields = Fields::new(buf, "soa");
                let mname = fields.name()?;
                let rname = fields.name()?;
                let soa = RData::Soa {
                    mname,
                    rname,
                    serial: fields.u32()?,
                    refresh: fields.u32()?,
                    retry: fields.u32()?,
                    expire: fields.u32()?,
                    minimum: fields.u32()?,
                };
                fields.finish(soa)
            }
            DnsType::SRV => {
                let mut fields = Fields::new(buf, "srv");
                let priority = fields.u16()?;
                let weight = fields.u16()?;
                let port = fields.u16()?;
                let target = fields.name()?;
                fields.finish(RData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                })
            }
            DnsType::A => {
                if data.len() != 4 {
                    return Err(Error::invalid_dns(format!(
                        "a rdata must be 4 bytes: {}",
                        data.len()
                    )));
                }
                Ok(RData::A(Ipv4Addr::from(data.uint32(0)?)))
            }
            DnsType::AAAA => {
                let octets: [u8; 16] = data.as_slice().try_into().map_err(|_| {
                    Error::invalid_dns(format!("aaaa rdata must be 16 bytes: {}", data.len()))
                })?;
                Ok(RData::Aaaa(Ipv6Addr::from(octets)))
            }
            other => Ok(RData::Other {
                rtype: other,
                data: data.clone(),
            }),
        }
    }

    /// Wire form of the data, names uncompressed
    pub fn to_bytes(&self) -> Result<ByteArray> {
        match self {
            RData::Cname(host) | RData::Ns(host) | RData::Ptr(host) => format_domain_name(host),
            RData::Mx {
                preference,
                exchange,
            } => {
                let mut buf = BytesMut::new();
                buf.put_u16(*preference);
                buf.put_slice(&format_domain_name(exchange)?);
                Ok(buf.into())
            }
            RData::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                let mut buf = BytesMut::new();
                buf.put_slice(&format_domain_name(mname)?);
                buf.put_slice(&format_domain_name(rname)?);
                for val in [serial, refresh, retry, expire, minimum] {
                    buf.put_u32(*val);
                }
                Ok(buf.into())
            }
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                let mut buf = BytesMut::new();
                buf.put_u16(*priority);
                buf.put_u16(*weight);
                buf.put_u16(*port);
                buf.put_slice(&format_domain_name(target)?);
                Ok(buf.into())
            }
            RData::A(addr) => Ok(ByteArray::from(addr.octets())),
            RData::Aaaa(addr) => Ok(ByteArray::from(addr.octets())),
            RData::Other { data, .. } => Ok(data.clone()),
        }
    }
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RData::Cname(host) | RData::Ns(host) | RData::Ptr(host) => write!(f, "{}", host),
            RData::Mx {
                preference,
                exchange,
            } => write!(f, "{} {}", preference, exchange),
            RData::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => write!(
                f,
                "{} {} {} {} {} {} {}",
                mname, rname, serial, refresh, retry, expire, minimum
            ),
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => write!(f, "{} {} {} {}", priority, weight, port, target),
            RData::A(addr) => write!(f, "{}", addr),
            RData::Aaaa(addr) => write!(f, "{}", addr),
            RData::Other { data, .. } => write!(f, "{}", data.to_hex_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cname_with_pointer_matches_uncompressed() {
        let mut message = vec![0u8; 12];
        message.extend_from_slice(b"\x07example\x03com\x00");
        let rdata_start = message.len();
        message.extend_from_slice(b"\x03www\xC0\x0C");
        let buf = PacketBuffer::from(message)
            .sub(rdata_start)
            .unwrap();

        let compressed = RData::parse(DnsType::CNAME, &buf).unwrap();

        let plain = PacketBuffer::from(b"\x03www\x07example\x03com\x00".to_vec());
        let uncompressed = RData::parse(DnsType::CNAME, &plain).unwrap();

        assert_eq!(compressed, uncompressed);
        assert_eq!(compressed, RData::Cname("www.example.com".to_string()));
    }

    #[test]
    fn test_cname_trailing_bytes_rejected() {
        let buf = PacketBuffer::from(b"\x03www\x00\xAA".to_vec());
        let err = RData::parse(DnsType::CNAME, &buf).unwrap_err();
        assert_eq!(
            err,
            Error::invalid_dns("more bytes readable in the cname rdata field: cname=www, data.len=6")
        );
    }

    #[test]
    fn test_cname_encodes_uncompressed() {
        let cname = RData::Cname("a.b".to_string());
        assert_eq!(cname.to_bytes().unwrap().to_vec(), b"\x01a\x01b\x00".to_vec());
        assert_eq!(cname.rtype(), DnsType::CNAME);
    }

    #[test]
    fn test_address_rdata() {
        let a = RData::parse(DnsType::A, &PacketBuffer::from(vec![10, 0, 0, 1])).unwrap();
        assert_eq!(a, RData::A(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(RData::parse(DnsType::A, &PacketBuffer::from(vec![10, 0, 0])).is_err());

        let mut v6 = vec![0u8; 16];
        v6[15] = 1;
        let aaaa = RData::parse(DnsType::AAAA, &PacketBuffer::from(v6.clone())).unwrap();
        assert_eq!(aaaa, RData::Aaaa(Ipv6Addr::LOCALHOST));
        assert_eq!(aaaa.to_bytes().unwrap().to_vec(), v6);
        assert!(RData::parse(DnsType::AAAA, &PacketBuffer::from(vec![0u8; 4])).is_err());
    }

    #[test]
    fn test_other_rdata_kept_raw() {
        let rdata = RData::parse(DnsType::TXT, &PacketBuffer::from(vec![2, b'h', b'i'])).unwrap();
        assert_eq!(rdata.rtype(), DnsType::TXT);
        assert_eq!(rdata.to_string(), "026869");
    }

    fn message_with_origin() -> (Vec<u8>, usize) {
        // "example.com" at offset 12 of a message
        let mut message = vec![0u8; 12];
        message.extend_from_slice(b"\x07example\x03com\x00");
        let rdata_start = message.len();
        (message, rdata_start)
    }

    #[test]
    fn test_name_bearing_rdata_expands_pointers() {
        let (mut message, at) = message_with_origin();
        message.extend_from_slice(b"\x02ns\xC0\x0C");
        let buf = PacketBuffer::from(message).sub(at).unwrap();
        let ns = RData::parse(DnsType::NS, &buf).unwrap();
        assert_eq!(ns, RData::Ns("ns.example.com".to_string()));
        assert_eq!(
            ns.to_bytes().unwrap().to_vec(),
            b"\x02ns\x07example\x03com\x00".to_vec()
        );

        let (mut message, at) = message_with_origin();
        message.extend_from_slice(&[0xC0, 0x0C]);
        let buf = PacketBuffer::from(message).sub(at).unwrap();
        assert_eq!(
            RData::parse(DnsType::PTR, &buf).unwrap(),
            RData::Ptr("example.com".to_string())
        );
    }

    #[test]
    fn test_mx_and_srv() {
        let (mut message, at) = message_with_origin();
        message.extend_from_slice(&[0x00, 0x0A, 0x04, b'm', b'a', b'i', b'l', 0xC0, 0x0C]);
        let buf = PacketBuffer::from(message).sub(at).unwrap();
        let mx = RData::parse(DnsType::MX, &buf).unwrap();
        assert_eq!(
            mx,
            RData::Mx {
                preference: 10,
                exchange: "mail.example.com".to_string()
            }
        );
        assert_eq!(mx.to_string(), "10 mail.example.com");

        let (mut message, at) = message_with_origin();
        message.extend_from_slice(&[0x00, 0x01, 0x00, 0x05, 0x14, 0x95, 0xC0, 0x0C]);
        let buf = PacketBuffer::from(message).sub(at).unwrap();
        let srv = RData::parse(DnsType::SRV, &buf).unwrap();
        assert_eq!(srv.to_string(), "1 5 5269 example.com");
        let encoded = srv.to_bytes().unwrap();
        assert_eq!(
            RData::parse(DnsType::SRV, &PacketBuffer::from(encoded)).unwrap(),
            srv
        );
    }

    #[test]
    fn test_soa() {
        let (mut message, at) = message_with_origin();
        message.extend_from_slice(b"\x03ns1\xC0\x0C\x0Ahostmaster\xC0\x0C");
        for val in [2024010101u32, 7200, 3600, 1209600, 300] {
            message.extend_from_slice(&val.to_be_bytes());
        }
        let buf = PacketBuffer::from(message).sub(at).unwrap();
        let soa = RData::parse(DnsType::SOA, &buf).unwrap();
        assert_eq!(
            soa.to_string(),
            "ns1.example.com hostmaster.example.com 2024010101 7200 3600 1209600 300"
        );
        assert_eq!(soa.rtype(), DnsType::SOA);

        // minimum cut short
        let (mut message, at) = message_with_origin();
        message.extend_from_slice(b"\x00\x00");
        message.extend_from_slice(&[0u8; 18]);
        let buf = PacketBuffer::from(message).sub(at).unwrap();
        assert_eq!(
            RData::parse(DnsType::SOA, &buf).unwrap_err(),
            Error::invalid_dns("soa rdata truncated at offset 18")
        );
    }

    #[test]
    fn test_mx_trailing_bytes_rejected() {
        let buf = PacketBuffer::from(b"\x00\x01\x01a\x00\xFF".to_vec());
        assert!(matches!(
            RData::parse(DnsType::MX, &buf),
            Err(Error::InvalidDns(_))
        ));
    }
}
