pub mod bearer;
pub mod operators;
pub mod password;
pub mod session;
pub mod state;
pub mod token_routes;
