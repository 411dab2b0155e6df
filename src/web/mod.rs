pub mod body;
pub mod middleware;
pub mod warp;
