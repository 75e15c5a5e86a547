/// Host-side program construction, golden model and result checking
pub mod builder;
pub mod compare;
pub mod fill;
pub mod reference;
pub mod request;

pub use builder::{BuiltProgram, GemmShape, Program};
pub use compare::{classify, compare_images, CompareReport, Tolerance, Verdict};
pub use reference::reference_image;
pub use request::{OpRequest, ProgramFile};
