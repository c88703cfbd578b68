//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to              |
//! |----------------|--------------------|--------------------------|
//! | `config_store` | ConfigPort         | postcard blob in memory  |
//! | `log_sink`     | EventSink          | `log` facade             |
//! | `time`         | ClockPort, DelayNs | `std::time`              |

pub mod config_store;
pub mod log_sink;
pub mod time;
