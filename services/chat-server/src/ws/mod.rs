pub mod gateway;

pub use gateway::ws_gateway_handler;
