use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassfileError {
    #[error("unexpected end of class file")]
    UnexpectedEof,
    #[error("invalid class file magic header")]
    InvalidMagic,
    #[error("unsupported constant pool tag {tag}")]
    UnsupportedConstant { tag: u8 },
    #[error("invalid constant pool index {index}")]
    InvalidConstantIndex { index: u16 },
    #[error("invalid modified UTF-8 string in constant pool")]
    Utf8Decode,
    #[error("constant pool has more than 65535 entries")]
    ConstantPoolOverflow,
    #[error("unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("truncated instruction at offset {offset}")]
    TruncatedInstruction { offset: usize },
    #[error("offset {offset} is not an instruction boundary")]
    InvalidOffset { offset: usize },
    #[error("malformed descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("malformed {name} attribute: {reason}")]
    MalformedAttribute { name: &'static str, reason: String },
    #[error("{what} exceeds class file limits")]
    LimitExceeded { what: &'static str },
}

pub type Result<T> = std::result::Result<T, ClassfileError>;
