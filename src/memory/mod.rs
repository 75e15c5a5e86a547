pub mod allocator;
pub mod image;
pub mod matrix;

pub use allocator::{Allocation, PageAllocator, Region};
pub use image::{MemoryImage, CODE_PAGE, DATA_PAGE, RESULT_PAGE};
pub use matrix::MatrixDesc;
