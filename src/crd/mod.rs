mod descriptor;
mod dogu;

pub use descriptor::*;
pub use dogu::*;
