pub mod signals;
pub mod smartapi;
pub mod symbol_master;

pub use signals::{SignalClient, SignalSourceError};
pub use smartapi::{
    CandleRequest, CandleResponse, SessionError, SmartApiClient, SmartApiCredentials,
    TransportError,
};
pub use symbol_master::{SymbolMaster, SymbolMasterError, SymbolTable};
