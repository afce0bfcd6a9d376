use rootcause::Report;
use thiserror::Error;

use crate::kcl::KCL_MAGIC;

/// Errors produced while decoding, building or encoding KCL data.
#[derive(Error, Debug)]
pub enum KclError {
    #[error("bad magic: expected 0x{:08X}, got 0x{got:08X}", KCL_MAGIC)]
    InvalidMagic { got: u32 },
    #[error("data too short: need {need} bytes at offset 0x{offset:X}, have {have}")]
    DataTooShort {
        offset: usize,
        need: usize,
        have: usize,
    },
    #[error("invalid section layout: {detail}")]
    InvalidSectionLayout { detail: String },
    #[error("triangle {triangle} references {table} index {index}, but the table has {len} entries")]
    IndexOutOfRange {
        triangle: usize,
        table: &'static str,
        index: usize,
        len: usize,
    },
    #[error("invalid octree at 0x{offset:X}: {detail}")]
    InvalidOctree { offset: usize, detail: String },
    #[error("triangle {triangle} is degenerate and cannot be prism-encoded")]
    DegenerateGeometry { triangle: usize },
    #[error("{pending} reserved offset(s) never satisfied, first at 0x{first_address:X}")]
    UnsatisfiedOffsetReservation { pending: usize, first_address: usize },
    #[error("only a single merged model can be encoded, got {count}")]
    UnsupportedMultiModel { count: usize },
    #[error("{count} triangles exceed the format limit of {max}")]
    TooManyTriangles { count: usize, max: usize },
    #[error("mesh has no triangles")]
    EmptyMesh,
    #[error("invalid encoder options: {detail}")]
    InvalidOptions { detail: String },
    #[error("no triangle with global index {global_index}")]
    GlobalIndexNotFound { global_index: u32 },
    #[error("OBJ line {line}: {detail}")]
    ObjParse { line: usize, detail: String },
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("IO error")]
    Io(#[from] std::io::Error),
}

impl From<winnow::error::ErrMode<winnow::error::ContextError>> for KclError {
    fn from(e: winnow::error::ErrMode<winnow::error::ContextError>) -> Self {
        KclError::ParseError(format!("{e}"))
    }
}

pub type KclResult<T> = Result<T, Report<KclError>>;
