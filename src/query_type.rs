//! DNS query type and class definitions and conversions

use serde_derive::{Deserialize, Serialize};

/// `QueryType` represents the requested Record Type of a query
///
/// The specific type Unknown takes an integer parameter in order to retain
/// the id of an unknown query when compiling the reply. An integer can be
/// converted to a querytype using the `from_num` function, and back to an
/// integer using the `to_num` method.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueryType {
    Unknown(u16),
    A,     // 1
    Ns,    // 2
    Cname, // 5
    Soa,   // 6
    Ptr,   // 12
    Mx,    // 15
    Txt,   // 16
    Aaaa,  // 28
    Srv,   // 33
    Sshfp, // 44
}

impl QueryType {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryType::Unknown(x) => x,
            QueryType::A => 1,
            QueryType::Ns => 2,
            QueryType::Cname => 5,
            QueryType::Soa => 6,
            QueryType::Ptr => 12,
            QueryType::Mx => 15,
            QueryType::Txt => 16,
            QueryType::Aaaa => 28,
            QueryType::Srv => 33,
            QueryType::Sshfp => 44,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::Ns,
            5 => QueryType::Cname,
            6 => QueryType::Soa,
            12 => QueryType::Ptr,
            15 => QueryType::Mx,
            16 => QueryType::Txt,
            28 => QueryType::Aaaa,
            33 => QueryType::Srv,
            44 => QueryType::Sshfp,
            _ => QueryType::Unknown(num),
        }
    }
}

/// The class of a question or record. Everything this engine answers lives
/// in `In`, but the wire value is preserved either way.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueryClass {
    In,     // 1
    Chaos,  // 3
    Hesiod, // 4
    Any,    // 255
    Unknown(u16),
}

impl QueryClass {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryClass::In => 1,
            QueryClass::Chaos => 3,
            QueryClass::Hesiod => 4,
            QueryClass::Any => 255,
            QueryClass::Unknown(x) => x,
        }
    }

    pub fn from_num(num: u16) -> QueryClass {
        match num {
            1 => QueryClass::In,
            3 => QueryClass::Chaos,
            4 => QueryClass::Hesiod,
            255 => QueryClass::Any,
            _ => QueryClass::Unknown(num),
        }
    }
}

impl Default for QueryClass {
    fn default() -> Self {
        QueryClass::In
    }
}
