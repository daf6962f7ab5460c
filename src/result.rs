use crate::{cell::CellId, quadtree::BlockRef};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TerrainError {
    #[error("the block pool of cell {cell} is exhausted ({capacity} blocks)")]
    OutOfBlocks { cell: CellId, capacity: usize },
    #[error("unknown terrain cell {0}")]
    UnknownCell(CellId),
    #[error("the block {0:?} no longer exists")]
    UnknownBlock(BlockRef),
    #[error("unknown render property `{0}`")]
    UnknownParameter(String),
    #[error("invalid value `{value}` for render property `{name}`")]
    InvalidParameter { name: String, value: String },
    #[error("a {width}x{height} height grid is too small for a terrain cell")]
    InvalidGrid { width: usize, height: usize },
    #[error("image error")]
    Image(#[from] image::ImageError),
    #[error("RON error")]
    Ron(#[from] ron::error::SpannedError),
    #[error("IO error")]
    Io(#[from] std::io::Error),
}

pub type TerrainResult<T> = Result<T, TerrainError>;
