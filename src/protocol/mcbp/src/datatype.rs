// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use core::fmt::{Display, Formatter};
use core::ops::{BitAnd, BitOr, BitOrAssign};

/// Datatype bits carried in the packet header. The bits describe the value:
/// whether it is JSON, whether it is Snappy compressed, and whether it has
/// an extended-attribute section prepended to the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Datatype(u8);

impl Datatype {
    pub const RAW: Datatype = Datatype(0x00);
    pub const JSON: Datatype = Datatype(0x01);
    pub const SNAPPY: Datatype = Datatype(0x02);
    pub const XATTR: Datatype = Datatype(0x04);

    const ALL: u8 = 0x07;

    pub fn from_bits(bits: u8) -> Option<Datatype> {
        if bits & !Self::ALL == 0 {
            Some(Datatype(bits))
        } else {
            None
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_raw(self) -> bool {
        self.0 == 0
    }

    pub fn is_json(self) -> bool {
        self.0 & Self::JSON.0 != 0
    }

    pub fn is_snappy(self) -> bool {
        self.0 & Self::SNAPPY.0 != 0
    }

    pub fn is_xattr(self) -> bool {
        self.0 & Self::XATTR.0 != 0
    }

    pub fn contains(self, other: Datatype) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn clear(&mut self, other: Datatype) {
        self.0 &= !other.0;
    }
}

impl BitOr for Datatype {
    type Output = Datatype;

    fn bitor(self, rhs: Datatype) -> Datatype {
        Datatype(self.0 | rhs.0)
    }
}

impl BitOrAssign for Datatype {
    fn bitor_assign(&mut self, rhs: Datatype) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Datatype {
    type Output = Datatype;

    fn bitand(self, rhs: Datatype) -> Datatype {
        Datatype(self.0 & rhs.0)
    }
}

impl Display for Datatype {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if self.is_raw() {
            return write!(f, "raw");
        }
        let mut first = true;
        for (bit, name) in [
            (Datatype::JSON, "json"),
            (Datatype::SNAPPY, "snappy"),
            (Datatype::XATTR, "xattr"),
        ] {
            if self.contains(bit) {
                if !first {
                    write!(f, ",")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits() {
        assert_eq!(Datatype::from_bits(0x03), Some(Datatype::JSON | Datatype::SNAPPY));
        assert_eq!(Datatype::from_bits(0x08), None);
        assert!((Datatype::JSON | Datatype::XATTR).is_xattr());

        let mut dt = Datatype::JSON | Datatype::XATTR;
        dt.clear(Datatype::XATTR);
        assert_eq!(dt, Datatype::JSON);
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Datatype::RAW), "raw");
        assert_eq!(format!("{}", Datatype::JSON | Datatype::XATTR), "json,xattr");
    }
}
