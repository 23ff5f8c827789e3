pub mod apply;
pub mod process;
pub mod update;

pub use apply::{Apply, ReadTempVertexProperty, ReadVertexProperty, WriteVertexProperty};
pub use process::{ProcessEdge, ReadDstProperty, ReadSrcEdges, ReadSrcProperty};
pub use update::{ReadTempDstProperty, Reduce, WriteTempDstProperty};
