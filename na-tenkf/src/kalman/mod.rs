
pub mod rts;
pub mod tenkf;
