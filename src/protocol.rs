//! implements the DNS protocol in a transport agnostic fashion
//!
//! Records, questions, headers and whole messages all read from and write to
//! a `PacketBuffer`. Record data is framed strictly by RDLENGTH: after a
//! variant decoder runs the cursor is put back at the record boundary, so a
//! compression pointer inside RDATA can never desynchronize the parse.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, Ipv6Addr};

use derive_more::{Display, Error, From};
use serde_derive::{Deserialize, Serialize};

use crate::buffer::{BufferError, PacketBuffer, VectorPacketBuffer};
use crate::query_type::{QueryClass, QueryType};

#[derive(Debug, Display, From, Error)]
pub enum ProtocolError {
    Buffer(BufferError),
    #[display(fmt = "message section counts do not match message data")]
    #[from(ignore)]
    MalformedMessage,
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, ProtocolError>;

/// TTL wrapper that is transparent to equality, ordering and hashing, so two
/// observations of the same record dedupe regardless of countdown state.
#[derive(Copy, Clone, Debug, Eq, Serialize, Deserialize)]
pub struct TransientTtl(pub u32);

impl PartialEq<TransientTtl> for TransientTtl {
    fn eq(&self, _: &TransientTtl) -> bool {
        true
    }
}

impl PartialOrd<TransientTtl> for TransientTtl {
    fn partial_cmp(&self, other: &TransientTtl) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransientTtl {
    fn cmp(&self, _: &TransientTtl) -> Ordering {
        Ordering::Equal
    }
}

impl Hash for TransientTtl {
    fn hash<H>(&self, _: &mut H)
    where
        H: Hasher,
    {
        // purposely left empty
    }
}

/// SSH public key algorithm carried in an SSHFP record (RFC 4255).
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SshAlgorithm {
    Rsa,   // 1
    Dss,   // 2
    Ecdsa, // 3
    Unknown(u8),
}

impl SshAlgorithm {
    pub fn to_num(&self) -> u8 {
        match *self {
            SshAlgorithm::Rsa => 1,
            SshAlgorithm::Dss => 2,
            SshAlgorithm::Ecdsa => 3,
            SshAlgorithm::Unknown(x) => x,
        }
    }

    pub fn from_num(num: u8) -> SshAlgorithm {
        match num {
            1 => SshAlgorithm::Rsa,
            2 => SshAlgorithm::Dss,
            3 => SshAlgorithm::Ecdsa,
            _ => SshAlgorithm::Unknown(num),
        }
    }
}

/// Fingerprint digest type of an SSHFP record; the digest length on the wire
/// is fixed by the type.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SshFingerprintType {
    Sha1,   // 1, 20 octets
    Sha256, // 2, 32 octets
    Unknown(u8),
}

impl SshFingerprintType {
    pub fn to_num(&self) -> u8 {
        match *self {
            SshFingerprintType::Sha1 => 1,
            SshFingerprintType::Sha256 => 2,
            SshFingerprintType::Unknown(x) => x,
        }
    }

    pub fn from_num(num: u8) -> SshFingerprintType {
        match num {
            1 => SshFingerprintType::Sha1,
            2 => SshFingerprintType::Sha256,
            _ => SshFingerprintType::Unknown(num),
        }
    }

    pub fn digest_len(&self) -> Option<usize> {
        match *self {
            SshFingerprintType::Sha1 => Some(20),
            SshFingerprintType::Sha256 => Some(32),
            SshFingerprintType::Unknown(_) => None,
        }
    }
}

/// `DnsRecord` is the primary representation of a DNS record
///
/// This enumeration is used for reading as well as writing records. Types
/// without a variant of their own are retained as `Unknown` with their raw
/// RDATA, so they survive a parse/serialize trip instead of failing the
/// message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DnsRecord {
    Unknown {
        domain: String,
        qtype: u16,
        class: QueryClass,
        data: Vec<u8>,
        ttl: TransientTtl,
    }, // 0
    A {
        domain: String,
        class: QueryClass,
        addr: Ipv4Addr,
        ttl: TransientTtl,
    }, // 1
    Ns {
        domain: String,
        class: QueryClass,
        host: String,
        ttl: TransientTtl,
    }, // 2
    Cname {
        domain: String,
        class: QueryClass,
        host: String,
        ttl: TransientTtl,
    }, // 5
    Soa {
        domain: String,
        class: QueryClass,
        m_name: String,
        r_name: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
        ttl: TransientTtl,
    }, // 6
    Ptr {
        domain: String,
        class: QueryClass,
        host: String,
        ttl: TransientTtl,
    }, // 12
    Mx {
        domain: String,
        class: QueryClass,
        priority: u16,
        host: String,
        ttl: TransientTtl,
    }, // 15
    Txt {
        domain: String,
        class: QueryClass,
        strings: Vec<String>,
        ttl: TransientTtl,
    }, // 16
    Aaaa {
        domain: String,
        class: QueryClass,
        addr: Ipv6Addr,
        ttl: TransientTtl,
    }, // 28
    Srv {
        domain: String,
        class: QueryClass,
        priority: u16,
        weight: u16,
        port: u16,
        host: String,
        ttl: TransientTtl,
    }, // 33
    Sshfp {
        domain: String,
        class: QueryClass,
        algorithm: SshAlgorithm,
        fingerprint_type: SshFingerprintType,
        fingerprint: Vec<u8>,
        ttl: TransientTtl,
    }, // 44
}

impl DnsRecord {
    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<DnsRecord> {
        let mut domain = String::new();
        buffer.read_qname(&mut domain)?;

        let qtype_num = buffer.read_u16()?;
        let qtype = QueryType::from_num(qtype_num);
        let class = QueryClass::from_num(buffer.read_u16()?);
        let ttl = buffer.read_u32()?;
        let data_len = buffer.read_u16()? as usize;
        let rdata_start = buffer.pos();

        let record = match qtype {
            QueryType::A => {
                let raw_addr = buffer.read_u32()?;
                let addr = Ipv4Addr::new(
                    ((raw_addr >> 24) & 0xFF) as u8,
                    ((raw_addr >> 16) & 0xFF) as u8,
                    ((raw_addr >> 8) & 0xFF) as u8,
                    (raw_addr & 0xFF) as u8,
                );

                DnsRecord::A {
                    domain,
                    class,
                    addr,
                    ttl: TransientTtl(ttl),
                }
            }
            QueryType::Aaaa => {
                let raw_addr1 = buffer.read_u32()?;
                let raw_addr2 = buffer.read_u32()?;
                let raw_addr3 = buffer.read_u32()?;
                let raw_addr4 = buffer.read_u32()?;
                let addr = Ipv6Addr::new(
                    ((raw_addr1 >> 16) & 0xFFFF) as u16,
                    (raw_addr1 & 0xFFFF) as u16,
                    ((raw_addr2 >> 16) & 0xFFFF) as u16,
                    (raw_addr2 & 0xFFFF) as u16,
                    ((raw_addr3 >> 16) & 0xFFFF) as u16,
                    (raw_addr3 & 0xFFFF) as u16,
                    ((raw_addr4 >> 16) & 0xFFFF) as u16,
                    (raw_addr4 & 0xFFFF) as u16,
                );

                DnsRecord::Aaaa {
                    domain,
                    class,
                    addr,
                    ttl: TransientTtl(ttl),
                }
            }
            QueryType::Ns => {
                let mut ns = String::new();
                buffer.read_qname(&mut ns)?;

                DnsRecord::Ns {
                    domain,
                    class,
                    host: ns,
                    ttl: TransientTtl(ttl),
                }
            }
            QueryType::Cname => {
                let mut cname = String::new();
                buffer.read_qname(&mut cname)?;

                DnsRecord::Cname {
                    domain,
                    class,
                    host: cname,
                    ttl: TransientTtl(ttl),
                }
            }
            QueryType::Ptr => {
                let mut ptr = String::new();
                buffer.read_qname(&mut ptr)?;

                DnsRecord::Ptr {
                    domain,
                    class,
                    host: ptr,
                    ttl: TransientTtl(ttl),
                }
            }
            QueryType::Srv => {
                let priority = buffer.read_u16()?;
                let weight = buffer.read_u16()?;
                let port = buffer.read_u16()?;

                let mut srv = String::new();
                buffer.read_qname(&mut srv)?;

                DnsRecord::Srv {
                    domain,
                    class,
                    priority,
                    weight,
                    port,
                    host: srv,
                    ttl: TransientTtl(ttl),
                }
            }
            QueryType::Mx => {
                let priority = buffer.read_u16()?;
                let mut mx = String::new();
                buffer.read_qname(&mut mx)?;

                DnsRecord::Mx {
                    domain,
                    class,
                    priority,
                    host: mx,
                    ttl: TransientTtl(ttl),
                }
            }
            QueryType::Soa => {
                let mut m_name = String::new();
                buffer.read_qname(&mut m_name)?;

                let mut r_name = String::new();
                buffer.read_qname(&mut r_name)?;

                let serial = buffer.read_u32()?;
                let refresh = buffer.read_u32()?;
                let retry = buffer.read_u32()?;
                let expire = buffer.read_u32()?;
                let minimum = buffer.read_u32()?;

                DnsRecord::Soa {
                    domain,
                    class,
                    m_name,
                    r_name,
                    serial,
                    refresh,
                    retry,
                    expire,
                    minimum,
                    ttl: TransientTtl(ttl),
                }
            }
            QueryType::Txt => {
                let rdata_end = rdata_start + data_len;

                let mut strings = Vec::new();
                while buffer.pos() < rdata_end {
                    strings.push(buffer.read_character_string()?);
                }

                // A character string running past RDLENGTH means the length
                // byte itself was bogus.
                if buffer.pos() != rdata_end {
                    return Err(BufferError::UnexpectedEndOfStream.into());
                }

                DnsRecord::Txt {
                    domain,
                    class,
                    strings,
                    ttl: TransientTtl(ttl),
                }
            }
            QueryType::Sshfp => {
                let algorithm = SshAlgorithm::from_num(buffer.read()?);
                let fingerprint_type = SshFingerprintType::from_num(buffer.read()?);

                let fp_len = fingerprint_type
                    .digest_len()
                    .unwrap_or_else(|| data_len.saturating_sub(2));

                let cur_pos = buffer.pos();
                let fingerprint = buffer.get_range(cur_pos, fp_len)?.to_vec();
                buffer.step(fp_len)?;

                DnsRecord::Sshfp {
                    domain,
                    class,
                    algorithm,
                    fingerprint_type,
                    fingerprint,
                    ttl: TransientTtl(ttl),
                }
            }
            QueryType::Unknown(_) => {
                let cur_pos = buffer.pos();
                let data = buffer.get_range(cur_pos, data_len)?.to_vec();
                buffer.step(data_len)?;

                DnsRecord::Unknown {
                    domain,
                    qtype: qtype_num,
                    class,
                    data,
                    ttl: TransientTtl(ttl),
                }
            }
        };

        // Records are framed by RDLENGTH, not by how far their decoder got;
        // this also undoes any compression jump taken inside RDATA.
        buffer.seek(rdata_start + data_len)?;

        Ok(record)
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<usize> {
        let start_pos = buffer.pos();

        match *self {
            DnsRecord::A {
                ref domain,
                class,
                ref addr,
                ttl: TransientTtl(ttl),
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::A.to_num())?;
                buffer.write_u16(class.to_num())?;
                buffer.write_u32(ttl)?;
                buffer.write_u16(4)?;

                let octets = addr.octets();
                buffer.write_u8(octets[0])?;
                buffer.write_u8(octets[1])?;
                buffer.write_u8(octets[2])?;
                buffer.write_u8(octets[3])?;
            }
            DnsRecord::Aaaa {
                ref domain,
                class,
                ref addr,
                ttl: TransientTtl(ttl),
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::Aaaa.to_num())?;
                buffer.write_u16(class.to_num())?;
                buffer.write_u32(ttl)?;
                buffer.write_u16(16)?;

                for octet in &addr.segments() {
                    buffer.write_u16(*octet)?;
                }
            }
            DnsRecord::Ns {
                ref domain,
                class,
                ref host,
                ttl: TransientTtl(ttl),
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::Ns.to_num())?;
                buffer.write_u16(class.to_num())?;
                buffer.write_u32(ttl)?;

                let pos = buffer.pos();
                buffer.write_u16(0)?;

                buffer.write_qname(host)?;

                let size = buffer.pos() - (pos + 2);
                buffer.set_u16(pos, size as u16)?;
            }
            DnsRecord::Cname {
                ref domain,
                class,
                ref host,
                ttl: TransientTtl(ttl),
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::Cname.to_num())?;
                buffer.write_u16(class.to_num())?;
                buffer.write_u32(ttl)?;

                let pos = buffer.pos();
                buffer.write_u16(0)?;

                buffer.write_qname(host)?;

                let size = buffer.pos() - (pos + 2);
                buffer.set_u16(pos, size as u16)?;
            }
            DnsRecord::Ptr {
                ref domain,
                class,
                ref host,
                ttl: TransientTtl(ttl),
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::Ptr.to_num())?;
                buffer.write_u16(class.to_num())?;
                buffer.write_u32(ttl)?;

                let pos = buffer.pos();
                buffer.write_u16(0)?;

                buffer.write_qname(host)?;

                let size = buffer.pos() - (pos + 2);
                buffer.set_u16(pos, size as u16)?;
            }
            DnsRecord::Srv {
                ref domain,
                class,
                priority,
                weight,
                port,
                ref host,
                ttl: TransientTtl(ttl),
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::Srv.to_num())?;
                buffer.write_u16(class.to_num())?;
                buffer.write_u32(ttl)?;

                let pos = buffer.pos();
                buffer.write_u16(0)?;

                buffer.write_u16(priority)?;
                buffer.write_u16(weight)?;
                buffer.write_u16(port)?;
                buffer.write_qname(host)?;

                let size = buffer.pos() - (pos + 2);
                buffer.set_u16(pos, size as u16)?;
            }
            DnsRecord::Mx {
                ref domain,
                class,
                priority,
                ref host,
                ttl: TransientTtl(ttl),
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::Mx.to_num())?;
                buffer.write_u16(class.to_num())?;
                buffer.write_u32(ttl)?;

                let pos = buffer.pos();
                buffer.write_u16(0)?;

                buffer.write_u16(priority)?;
                buffer.write_qname(host)?;

                let size = buffer.pos() - (pos + 2);
                buffer.set_u16(pos, size as u16)?;
            }
            DnsRecord::Soa {
                ref domain,
                class,
                ref m_name,
                ref r_name,
                serial,
                refresh,
                retry,
                expire,
                minimum,
                ttl: TransientTtl(ttl),
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::Soa.to_num())?;
                buffer.write_u16(class.to_num())?;
                buffer.write_u32(ttl)?;

                let pos = buffer.pos();
                buffer.write_u16(0)?;

                buffer.write_qname(m_name)?;
                buffer.write_qname(r_name)?;
                buffer.write_u32(serial)?;
                buffer.write_u32(refresh)?;
                buffer.write_u32(retry)?;
                buffer.write_u32(expire)?;
                buffer.write_u32(minimum)?;

                let size = buffer.pos() - (pos + 2);
                buffer.set_u16(pos, size as u16)?;
            }
            DnsRecord::Txt {
                ref domain,
                class,
                ref strings,
                ttl: TransientTtl(ttl),
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::Txt.to_num())?;
                buffer.write_u16(class.to_num())?;
                buffer.write_u32(ttl)?;

                let pos = buffer.pos();
                buffer.write_u16(0)?;

                for s in strings {
                    buffer.write_character_string(s)?;
                }

                let size = buffer.pos() - (pos + 2);
                buffer.set_u16(pos, size as u16)?;
            }
            DnsRecord::Sshfp {
                ref domain,
                class,
                algorithm,
                fingerprint_type,
                ref fingerprint,
                ttl: TransientTtl(ttl),
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::Sshfp.to_num())?;
                buffer.write_u16(class.to_num())?;
                buffer.write_u32(ttl)?;

                let pos = buffer.pos();
                buffer.write_u16(0)?;

                buffer.write_u8(algorithm.to_num())?;
                buffer.write_u8(fingerprint_type.to_num())?;
                for &b in fingerprint {
                    buffer.write_u8(b)?;
                }

                let size = buffer.pos() - (pos + 2);
                buffer.set_u16(pos, size as u16)?;
            }
            DnsRecord::Unknown {
                ref domain,
                qtype,
                class,
                ref data,
                ttl: TransientTtl(ttl),
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(qtype)?;
                buffer.write_u16(class.to_num())?;
                buffer.write_u32(ttl)?;
                buffer.write_u16(data.len() as u16)?;

                for &b in data {
                    buffer.write_u8(b)?;
                }
            }
        }

        Ok(buffer.pos() - start_pos)
    }

    pub fn get_querytype(&self) -> QueryType {
        match *self {
            DnsRecord::A { .. } => QueryType::A,
            DnsRecord::Aaaa { .. } => QueryType::Aaaa,
            DnsRecord::Ns { .. } => QueryType::Ns,
            DnsRecord::Cname { .. } => QueryType::Cname,
            DnsRecord::Ptr { .. } => QueryType::Ptr,
            DnsRecord::Srv { .. } => QueryType::Srv,
            DnsRecord::Mx { .. } => QueryType::Mx,
            DnsRecord::Soa { .. } => QueryType::Soa,
            DnsRecord::Txt { .. } => QueryType::Txt,
            DnsRecord::Sshfp { .. } => QueryType::Sshfp,
            DnsRecord::Unknown { qtype, .. } => QueryType::Unknown(qtype),
        }
    }

    pub fn get_domain(&self) -> Option<String> {
        match *self {
            DnsRecord::A { ref domain, .. }
            | DnsRecord::Aaaa { ref domain, .. }
            | DnsRecord::Ns { ref domain, .. }
            | DnsRecord::Cname { ref domain, .. }
            | DnsRecord::Ptr { ref domain, .. }
            | DnsRecord::Srv { ref domain, .. }
            | DnsRecord::Mx { ref domain, .. }
            | DnsRecord::Soa { ref domain, .. }
            | DnsRecord::Txt { ref domain, .. }
            | DnsRecord::Sshfp { ref domain, .. }
            | DnsRecord::Unknown { ref domain, .. } => Some(domain.clone()),
        }
    }

    pub fn get_ttl(&self) -> u32 {
        match *self {
            DnsRecord::A {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Aaaa {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Ns {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Cname {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Ptr {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Srv {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Mx {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Soa {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Txt {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Sshfp {
                ttl: TransientTtl(ttl),
                ..
            }
            | DnsRecord::Unknown {
                ttl: TransientTtl(ttl),
                ..
            } => ttl,
        }
    }
}

/// The kind of operation a message requests.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    Query,        // 0
    InverseQuery, // 1
    Status,       // 2
    Notify,       // 4
    Update,       // 5
    Unknown(u8),
}

impl Opcode {
    pub fn to_num(&self) -> u8 {
        match *self {
            Opcode::Query => 0,
            Opcode::InverseQuery => 1,
            Opcode::Status => 2,
            Opcode::Notify => 4,
            Opcode::Update => 5,
            Opcode::Unknown(x) => x,
        }
    }

    pub fn from_num(num: u8) -> Opcode {
        match num {
            0 => Opcode::Query,
            1 => Opcode::InverseQuery,
            2 => Opcode::Status,
            4 => Opcode::Notify,
            5 => Opcode::Update,
            _ => Opcode::Unknown(num),
        }
    }
}

impl Default for Opcode {
    fn default() -> Self {
        Opcode::Query
    }
}

/// The result code for a DNS query, as described in the specification
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ResultCode {
    #[default]
    NOERROR = 0,
    FORMERR = 1,
    SERVFAIL = 2,
    NXDOMAIN = 3,
    NOTIMP = 4,
    REFUSED = 5,
}

impl ResultCode {
    pub fn from_num(num: u8) -> ResultCode {
        match num {
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            _ => ResultCode::NOERROR,
        }
    }
}

/// Representation of a DNS header
#[derive(Clone, Debug, Default)]
pub struct DnsHeader {
    pub id: u16, // 16 bits

    pub recursion_desired: bool,    // 1 bit
    pub truncated_message: bool,    // 1 bit
    pub authoritative_answer: bool, // 1 bit
    pub opcode: Opcode,             // 4 bits
    pub response: bool,             // 1 bit

    pub rescode: ResultCode,       // 4 bits
    pub checking_disabled: bool,   // 1 bit
    pub authed_data: bool,         // 1 bit
    pub z: bool,                   // 1 bit
    pub recursion_available: bool, // 1 bit

    pub questions: u16,             // 16 bits
    pub answers: u16,               // 16 bits
    pub authoritative_entries: u16, // 16 bits
    pub resource_entries: u16,      // 16 bits
}

impl DnsHeader {
    pub fn new() -> DnsHeader {
        DnsHeader::default()
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            (self.recursion_desired as u8)
                | ((self.truncated_message as u8) << 1)
                | ((self.authoritative_answer as u8) << 2)
                | ((self.opcode.to_num() & 0x0F) << 3)
                | ((self.response as u8) << 7),
        )?;

        buffer.write_u8(
            (self.rescode as u8)
                | ((self.checking_disabled as u8) << 4)
                | ((self.authed_data as u8) << 5)
                | ((self.z as u8) << 6)
                | ((self.recursion_available as u8) << 7),
        )?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }

    pub fn binary_len(&self) -> usize {
        12
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        self.id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        let a = (flags >> 8) as u8;
        let b = (flags & 0xFF) as u8;
        self.recursion_desired = (a & (1 << 0)) > 0;
        self.truncated_message = (a & (1 << 1)) > 0;
        self.authoritative_answer = (a & (1 << 2)) > 0;
        self.opcode = Opcode::from_num((a >> 3) & 0x0F);
        self.response = (a & (1 << 7)) > 0;

        self.rescode = ResultCode::from_num(b & 0x0F);
        self.checking_disabled = (b & (1 << 4)) > 0;
        self.authed_data = (b & (1 << 5)) > 0;
        self.z = (b & (1 << 6)) > 0;
        self.recursion_available = (b & (1 << 7)) > 0;

        self.questions = buffer.read_u16()?;
        self.answers = buffer.read_u16()?;
        self.authoritative_entries = buffer.read_u16()?;
        self.resource_entries = buffer.read_u16()?;

        Ok(())
    }
}

impl fmt::Display for DnsHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DnsHeader:")?;
        writeln!(f, "\tid: {0}", self.id)?;

        writeln!(f, "\trecursion_desired: {0}", self.recursion_desired)?;
        writeln!(f, "\ttruncated_message: {0}", self.truncated_message)?;
        writeln!(f, "\tauthoritative_answer: {0}", self.authoritative_answer)?;
        writeln!(f, "\topcode: {:?}", self.opcode)?;
        writeln!(f, "\tresponse: {0}", self.response)?;

        writeln!(f, "\trescode: {:?}", self.rescode)?;
        writeln!(f, "\trecursion_available: {0}", self.recursion_available)?;

        writeln!(f, "\tquestions: {0}", self.questions)?;
        writeln!(f, "\tanswers: {0}", self.answers)?;
        writeln!(f, "\tauthoritative_entries: {0}", self.authoritative_entries)?;
        writeln!(f, "\tresource_entries: {0}", self.resource_entries)?;

        Ok(())
    }
}

/// Representation of a DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: QueryType,
    pub class: QueryClass,
}

impl DnsQuestion {
    pub fn new(name: String, qtype: QueryType) -> DnsQuestion {
        DnsQuestion {
            name,
            qtype,
            class: QueryClass::In,
        }
    }

    pub fn binary_len(&self) -> usize {
        self.name
            .split('.')
            .map(|x| x.len() + 1)
            .fold(1, |x, y| x + y)
            + 4
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(self.class.to_num())?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        buffer.read_qname(&mut self.name)?;
        self.qtype = QueryType::from_num(buffer.read_u16()?);
        self.class = QueryClass::from_num(buffer.read_u16()?);

        Ok(())
    }
}

impl fmt::Display for DnsQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DnsQuestion:")?;
        writeln!(f, "\tname: {0}", self.name)?;
        writeln!(f, "\trecord type: {:?}", self.qtype)?;
        writeln!(f, "\tclass: {:?}", self.class)?;

        Ok(())
    }
}

/// Representation of a complete DNS packet
///
/// This is the work horse of the engine. A DNS packet can be read and written
/// in a single operation, and is used both by the network facing components
/// and by whatever the embedding application layers on top.
#[derive(Clone, Debug, Default)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub resources: Vec<DnsRecord>,
}

impl DnsPacket {
    pub fn new() -> DnsPacket {
        DnsPacket {
            header: DnsHeader::new(),
            questions: Vec::new(),
            answers: Vec::new(),
            authorities: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Parse a whole message. The header counts dictate how many entries each
    /// section must hold; a section that cannot be fully read fails the
    /// message as malformed.
    pub fn from_buffer<T: PacketBuffer>(buffer: &mut T) -> Result<DnsPacket> {
        let mut result = DnsPacket::new();
        result.header.read(buffer)?;

        for _ in 0..result.header.questions {
            let mut question = DnsQuestion::new("".to_string(), QueryType::Unknown(0));
            question
                .read(buffer)
                .map_err(|_| ProtocolError::MalformedMessage)?;
            result.questions.push(question);
        }

        for _ in 0..result.header.answers {
            let rec = DnsRecord::read(buffer).map_err(|_| ProtocolError::MalformedMessage)?;
            result.answers.push(rec);
        }
        for _ in 0..result.header.authoritative_entries {
            let rec = DnsRecord::read(buffer).map_err(|_| ProtocolError::MalformedMessage)?;
            result.authorities.push(rec);
        }
        for _ in 0..result.header.resource_entries {
            let rec = DnsRecord::read(buffer).map_err(|_| ProtocolError::MalformedMessage)?;
            result.resources.push(rec);
        }

        Ok(result)
    }

    /// Build a response to this request: same id, opcode and RD, QR set, the
    /// question section echoed, and the supplied flags and sections installed.
    pub fn create_response(
        &self,
        authoritative: bool,
        recursion_available: bool,
        rescode: ResultCode,
        answers: Vec<DnsRecord>,
        authorities: Vec<DnsRecord>,
        resources: Vec<DnsRecord>,
    ) -> DnsPacket {
        let mut packet = DnsPacket::new();

        packet.header.id = self.header.id;
        packet.header.opcode = self.header.opcode;
        packet.header.recursion_desired = self.header.recursion_desired;
        packet.header.response = true;
        packet.header.authoritative_answer = authoritative;
        packet.header.recursion_available = recursion_available;
        packet.header.rescode = rescode;

        packet.questions = self.questions.clone();
        packet.answers = answers;
        packet.authorities = authorities;
        packet.resources = resources;

        packet
    }

    /// Serialize the packet, recomputing the section counts from the actual
    /// section contents. Records that would push the message past `max_size`
    /// are dropped and the truncation flag is set instead.
    pub fn write<T: PacketBuffer>(&mut self, buffer: &mut T, max_size: usize) -> Result<()> {
        let mut test_buffer = VectorPacketBuffer::new();

        let mut size = self.header.binary_len();
        for question in &self.questions {
            size += question.binary_len();
            question.write(&mut test_buffer)?;
        }

        self.header.answers = 0;
        self.header.authoritative_entries = 0;
        self.header.resource_entries = 0;

        let mut record_count = self.answers.len() + self.authorities.len() + self.resources.len();

        for (i, rec) in self
            .answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.resources.iter())
            .enumerate()
        {
            size += rec.write(&mut test_buffer)?;
            if size > max_size {
                record_count = i;
                self.header.truncated_message = true;
                break;
            } else if i < self.answers.len() {
                self.header.answers += 1;
            } else if i < self.answers.len() + self.authorities.len() {
                self.header.authoritative_entries += 1;
            } else {
                self.header.resource_entries += 1;
            }
        }

        self.header.questions = self.questions.len() as u16;

        self.header.write(buffer)?;

        for question in &self.questions {
            question.write(buffer)?;
        }

        for rec in self
            .answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.resources.iter())
            .take(record_count)
        {
            rec.write(buffer)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::buffer::{PacketBuffer, VectorPacketBuffer};

    fn roundtrip(packet: &mut DnsPacket) -> DnsPacket {
        let mut buffer = VectorPacketBuffer::new();
        packet.write(&mut buffer, 0xFFFF).unwrap();
        buffer.seek(0).unwrap();
        DnsPacket::from_buffer(&mut buffer).unwrap()
    }

    #[test]
    fn test_packet_roundtrip() {
        let mut packet = DnsPacket::new();
        packet.header.id = 1337;
        packet.header.response = true;

        packet.questions.push(DnsQuestion::new(
            "example.org".to_string(),
            QueryType::Ns,
        ));
        packet.answers.push(DnsRecord::Ns {
            domain: "example.org".to_string(),
            class: QueryClass::In,
            host: "ns1.example.org".to_string(),
            ttl: TransientTtl(3600),
        });
        packet.answers.push(DnsRecord::Ns {
            domain: "example.org".to_string(),
            class: QueryClass::In,
            host: "ns2.example.org".to_string(),
            ttl: TransientTtl(3600),
        });

        let parsed = roundtrip(&mut packet);

        assert_eq!(1337, parsed.header.id);
        assert_eq!(packet.questions[0], parsed.questions[0]);
        assert_eq!(packet.answers[0], parsed.answers[0]);
        assert_eq!(packet.answers[1], parsed.answers[1]);
        assert_eq!(2, parsed.header.answers);
    }

    #[test]
    fn test_a_record_roundtrip() {
        let mut packet = DnsPacket::new();
        packet.answers.push(DnsRecord::A {
            domain: "api1.example.org".to_string(),
            class: QueryClass::In,
            addr: "141.24.12.2".parse().unwrap(),
            ttl: TransientTtl(2_592_000),
        });

        let parsed = roundtrip(&mut packet);
        match parsed.answers[0] {
            DnsRecord::A {
                ref domain,
                class,
                addr,
                ..
            } => {
                assert_eq!("api1.example.org", domain);
                assert_eq!(QueryClass::In, class);
                assert_eq!("141.24.12.2".parse::<std::net::Ipv4Addr>().unwrap(), addr);
            }
            _ => panic!("expected A record"),
        }
        assert_eq!(2_592_000, parsed.answers[0].get_ttl());
    }

    #[test]
    fn test_aaaa_record_roundtrip() {
        let mut packet = DnsPacket::new();
        packet.answers.push(DnsRecord::Aaaa {
            domain: "api1.example.org".to_string(),
            class: QueryClass::In,
            addr: "2001:db8::2:1".parse().unwrap(),
            ttl: TransientTtl(300),
        });

        let parsed = roundtrip(&mut packet);
        match parsed.answers[0] {
            DnsRecord::Aaaa { addr, .. } => {
                assert_eq!("2001:db8::2:1".parse::<std::net::Ipv6Addr>().unwrap(), addr);
            }
            _ => panic!("expected AAAA record"),
        }
    }

    #[test]
    fn test_srv_record_roundtrip() {
        let mut packet = DnsPacket::new();
        packet.answers.push(DnsRecord::Srv {
            domain: "_ocpp._tls.api2.example.org".to_string(),
            class: QueryClass::In,
            priority: 10,
            weight: 20,
            port: 443,
            host: "api2.example.org".to_string(),
            ttl: TransientTtl(2_592_000),
        });

        let parsed = roundtrip(&mut packet);
        match parsed.answers[0] {
            DnsRecord::Srv {
                ref domain,
                priority,
                weight,
                port,
                ref host,
                ..
            } => {
                assert_eq!("_ocpp._tls.api2.example.org", domain);
                assert_eq!(10, priority);
                assert_eq!(20, weight);
                assert_eq!(443, port);
                assert_eq!("api2.example.org", host);
            }
            _ => panic!("expected SRV record"),
        }
    }

    #[test]
    fn test_soa_full_range_roundtrip() {
        for &val in &[0u32, 1, 0x7FFF_FFFF, 0xFFFF_FFFF] {
            let mut packet = DnsPacket::new();
            packet.authorities.push(DnsRecord::Soa {
                domain: "example.org".to_string(),
                class: QueryClass::In,
                m_name: "ns1.example.org".to_string(),
                r_name: "hostmaster.example.org".to_string(),
                serial: val,
                refresh: val,
                retry: val,
                expire: val,
                minimum: val,
                ttl: TransientTtl(3600),
            });

            let parsed = roundtrip(&mut packet);
            match parsed.authorities[0] {
                DnsRecord::Soa {
                    serial,
                    refresh,
                    retry,
                    expire,
                    minimum,
                    ..
                } => {
                    assert_eq!(val, serial);
                    assert_eq!(val, refresh);
                    assert_eq!(val, retry);
                    assert_eq!(val, expire);
                    assert_eq!(val, minimum);
                }
                _ => panic!("expected SOA record"),
            }
        }
    }

    #[test]
    fn test_mx_ptr_cname_roundtrip() {
        let mut packet = DnsPacket::new();
        packet.answers.push(DnsRecord::Mx {
            domain: "example.org".to_string(),
            class: QueryClass::In,
            priority: 10,
            host: "mail.example.org".to_string(),
            ttl: TransientTtl(3600),
        });
        packet.answers.push(DnsRecord::Ptr {
            domain: "2.12.24.141.in-addr.arpa".to_string(),
            class: QueryClass::In,
            host: "api1.example.org".to_string(),
            ttl: TransientTtl(3600),
        });
        packet.answers.push(DnsRecord::Cname {
            domain: "www.example.org".to_string(),
            class: QueryClass::In,
            host: "api1.example.org".to_string(),
            ttl: TransientTtl(3600),
        });

        let parsed = roundtrip(&mut packet);
        assert_eq!(packet.answers, parsed.answers);
    }

    #[test]
    fn test_txt_multiple_strings_roundtrip() {
        let mut packet = DnsPacket::new();
        packet.answers.push(DnsRecord::Txt {
            domain: "example.org".to_string(),
            class: QueryClass::In,
            strings: vec!["v=spf1 -all".to_string(), "second string".to_string()],
            ttl: TransientTtl(3600),
        });

        let parsed = roundtrip(&mut packet);
        match parsed.answers[0] {
            DnsRecord::Txt { ref strings, .. } => {
                assert_eq!(
                    &["v=spf1 -all".to_string(), "second string".to_string()],
                    strings.as_slice()
                );
            }
            _ => panic!("expected TXT record"),
        }
    }

    #[test]
    fn test_sshfp_roundtrip_both_digests() {
        let mut packet = DnsPacket::new();
        packet.answers.push(DnsRecord::Sshfp {
            domain: "api1.example.org".to_string(),
            class: QueryClass::In,
            algorithm: SshAlgorithm::Rsa,
            fingerprint_type: SshFingerprintType::Sha1,
            fingerprint: (0u8..20).collect(),
            ttl: TransientTtl(3600),
        });
        packet.answers.push(DnsRecord::Sshfp {
            domain: "api1.example.org".to_string(),
            class: QueryClass::In,
            algorithm: SshAlgorithm::Ecdsa,
            fingerprint_type: SshFingerprintType::Sha256,
            fingerprint: (0u8..32).collect(),
            ttl: TransientTtl(3600),
        });

        let parsed = roundtrip(&mut packet);
        assert_eq!(packet.answers, parsed.answers);

        match parsed.answers[1] {
            DnsRecord::Sshfp {
                algorithm,
                fingerprint_type,
                ref fingerprint,
                ..
            } => {
                assert_eq!(SshAlgorithm::Ecdsa, algorithm);
                assert_eq!(SshFingerprintType::Sha256, fingerprint_type);
                assert_eq!(32, fingerprint.len());
            }
            _ => panic!("expected SSHFP record"),
        }
    }

    #[test]
    fn test_unknown_record_retains_rdata() {
        let mut packet = DnsPacket::new();
        packet.answers.push(DnsRecord::Unknown {
            domain: "example.org".to_string(),
            qtype: 99,
            class: QueryClass::In,
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
            ttl: TransientTtl(60),
        });

        let parsed = roundtrip(&mut packet);
        match parsed.answers[0] {
            DnsRecord::Unknown {
                qtype, ref data, ..
            } => {
                assert_eq!(99, qtype);
                assert_eq!(&[0xDE, 0xAD, 0xBE, 0xEF], data.as_slice());
            }
            _ => panic!("expected unknown record"),
        }
    }

    #[test]
    fn test_header_flags_roundtrip() {
        let mut packet = DnsPacket::new();
        packet.header.id = 0xBEEF;
        packet.header.response = true;
        packet.header.opcode = Opcode::Update;
        packet.header.authoritative_answer = true;
        packet.header.recursion_desired = true;
        packet.header.recursion_available = true;
        packet.header.rescode = ResultCode::REFUSED;

        let parsed = roundtrip(&mut packet);
        assert_eq!(0xBEEF, parsed.header.id);
        assert!(parsed.header.response);
        assert_eq!(Opcode::Update, parsed.header.opcode);
        assert!(parsed.header.authoritative_answer);
        assert!(parsed.header.recursion_desired);
        assert!(parsed.header.recursion_available);
        assert_eq!(ResultCode::REFUSED, parsed.header.rescode);
    }

    #[test]
    fn test_oversized_opcode_stays_in_its_field() {
        // An out-of-range opcode must not bleed into the QR or AA bits.
        let mut header = DnsHeader::new();
        header.opcode = Opcode::Unknown(0xFF);

        let mut buffer = VectorPacketBuffer::new();
        header.write(&mut buffer).unwrap();
        buffer.seek(0).unwrap();

        let mut parsed = DnsHeader::new();
        parsed.read(&mut buffer).unwrap();
        assert!(!parsed.response);
        assert!(!parsed.authoritative_answer);
        assert_eq!(Opcode::Unknown(0x0F), parsed.opcode);
    }

    #[test]
    fn test_count_mismatch_is_malformed() {
        // Two real records, but a header claiming five.
        let mut buffer = VectorPacketBuffer::new();

        let mut header = DnsHeader::new();
        header.answers = 5;
        header.write(&mut buffer).unwrap();

        for host in &["api1.example.org", "api2.example.org"] {
            let rec = DnsRecord::A {
                domain: host.to_string(),
                class: QueryClass::In,
                addr: "127.0.0.1".parse().unwrap(),
                ttl: TransientTtl(60),
            };
            rec.write(&mut buffer).unwrap();
        }

        buffer.seek(0).unwrap();
        match DnsPacket::from_buffer(&mut buffer) {
            Err(ProtocolError::MalformedMessage) => {}
            other => panic!("expected MalformedMessage, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_truncation_sets_tc_and_counts() {
        let mut packet = DnsPacket::new();
        packet
            .questions
            .push(DnsQuestion::new("example.org".to_string(), QueryType::Txt));
        for i in 0..64 {
            packet.answers.push(DnsRecord::Txt {
                domain: "example.org".to_string(),
                class: QueryClass::In,
                strings: vec![format!("filler entry number {:03}", i)],
                ttl: TransientTtl(60),
            });
        }

        let mut buffer = VectorPacketBuffer::new();
        packet.write(&mut buffer, 512).unwrap();

        assert!(packet.header.truncated_message);
        assert!((packet.header.answers as usize) < 64);

        buffer.seek(0).unwrap();
        let parsed = DnsPacket::from_buffer(&mut buffer).unwrap();
        assert_eq!(packet.header.answers, parsed.header.answers);
        assert!(parsed.header.truncated_message);
    }

    #[test]
    fn test_create_response() {
        let mut request = DnsPacket::new();
        request.header.id = 4711;
        request.header.opcode = Opcode::Query;
        request.header.recursion_desired = true;
        request
            .questions
            .push(DnsQuestion::new("api1.example.org".to_string(), QueryType::A));

        let answers = vec![DnsRecord::A {
            domain: "api1.example.org".to_string(),
            class: QueryClass::In,
            addr: "141.24.12.2".parse().unwrap(),
            ttl: TransientTtl(30),
        }];

        let response =
            request.create_response(true, false, ResultCode::NOERROR, answers, Vec::new(), Vec::new());

        assert_eq!(4711, response.header.id);
        assert!(response.header.response);
        assert!(response.header.authoritative_answer);
        assert!(response.header.recursion_desired);
        assert!(!response.header.recursion_available);
        assert_eq!(request.questions, response.questions);
        assert_eq!(1, response.answers.len());
    }

    #[test]
    fn test_whole_message_shares_compression_table() {
        let mut packet = DnsPacket::new();
        packet
            .questions
            .push(DnsQuestion::new("a.example.org".to_string(), QueryType::A));
        packet.answers.push(DnsRecord::A {
            domain: "a.example.org".to_string(),
            class: QueryClass::In,
            addr: "127.0.0.1".parse().unwrap(),
            ttl: TransientTtl(60),
        });
        packet.answers.push(DnsRecord::A {
            domain: "b.example.org".to_string(),
            class: QueryClass::In,
            addr: "127.0.0.2".parse().unwrap(),
            ttl: TransientTtl(60),
        });

        let mut compressed = VectorPacketBuffer::new();
        packet.clone().write(&mut compressed, 0xFFFF).unwrap();

        // The answer repeating the question name collapses to a pointer, so
        // the compressed form must come in well under the naive encoding.
        let naive = 12 + (15 + 4) + 2 * (15 + 10 + 4);
        assert!(compressed.pos() < naive);

        compressed.seek(0).unwrap();
        let parsed = DnsPacket::from_buffer(&mut compressed).unwrap();
        assert_eq!("a.example.org", parsed.questions[0].name);
        assert_eq!(
            Some("a.example.org".to_string()),
            parsed.answers[0].get_domain()
        );
        assert_eq!(
            Some("b.example.org".to_string()),
            parsed.answers[1].get_domain()
        );
    }
}
