use crate::error::{ClassfileError, Result};

pub(crate) struct ClassReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ClassReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn expect_magic(&mut self) -> Result<()> {
        const MAGIC: u32 = 0xCAFEBABE;
        if self.read_u4()? != MAGIC {
            return Err(ClassfileError::InvalidMagic);
        }
        Ok(())
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub(crate) fn read_u1(&mut self) -> Result<u8> {
        let value = *self.data.get(self.pos).ok_or(ClassfileError::UnexpectedEof)?;
        self.pos += 1;
        Ok(value)
    }

    pub(crate) fn read_u2(&mut self) -> Result<u16> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u4(&mut self) -> Result<u32> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ClassfileError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

/// Big-endian output helpers for class file structures.
pub(crate) trait WriteBe {
    fn put_u1(&mut self, value: u8);
    fn put_u2(&mut self, value: u16);
    fn put_u4(&mut self, value: u32);
}

impl WriteBe for Vec<u8> {
    fn put_u1(&mut self, value: u8) {
        self.push(value);
    }

    fn put_u2(&mut self, value: u16) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn put_u4(&mut self, value: u32) {
        self.extend_from_slice(&value.to_be_bytes());
    }
}

pub(crate) fn checked_u2(value: usize, what: &'static str) -> Result<u16> {
    u16::try_from(value).map_err(|_| ClassfileError::LimitExceeded { what })
}

pub(crate) fn checked_u4(value: usize, what: &'static str) -> Result<u32> {
    u32::try_from(value).map_err(|_| ClassfileError::LimitExceeded { what })
}
