//! Addresses in a foreign address space.
//!
//! An [`Address`] is a plain host-width integer with arithmetic and ordering;
//! it never derefs to anything in this process.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(usize);

impl Address {
    pub const fn new(addr: usize) -> Self {
        Address(addr)
    }

    pub const fn get(self) -> usize {
        self.0
    }

    /// Distance in bytes to a lower address.
    pub fn offset_from(self, other: Address) -> usize {
        self.0 - other.0
    }
}

impl From<usize> for Address {
    fn from(addr: usize) -> Self {
        Address(addr)
    }
}

impl From<Address> for usize {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl Add<usize> for Address {
    type Output = Address;

    fn add(self, rhs: usize) -> Address {
        Address(self.0 + rhs)
    }
}

impl AddAssign<usize> for Address {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

impl Sub<usize> for Address {
    type Output = Address;

    fn sub(self, rhs: usize) -> Address {
        Address(self.0 - rhs)
    }
}

impl SubAssign<usize> for Address {
    fn sub_assign(&mut self, rhs: usize) {
        self.0 -= rhs;
    }
}

impl Sub<Address> for Address {
    type Output = usize;

    fn sub(self, rhs: Address) -> usize {
        self.0 - rhs.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let a = Address::new(0x1000);
        assert_eq!((a + 0x10).get(), 0x1010);
        assert_eq!((a - 0x10).get(), 0xff0);
        assert_eq!(a + 0x10 - a, 0x10);
        assert!(a < a + 1);
    }

    #[test]
    fn formatting() {
        assert_eq!(format!("{}", Address::new(0xdead)), "0xdead");
        assert_eq!(format!("{:012x}", Address::new(0xdead)), "00000000dead");
    }
}
