pub mod broker_ws;

pub use broker_ws::BrokerWs;
