//! Adapters: concrete implementations of the client port traits.
//!
//! | Adapter       | Implements     | Connects to                    |
//! |---------------|----------------|--------------------------------|
//! | `esp_image`   | ImageTarget    | ESP-IDF OTA partitions         |
//! | `log_handler` | ClientHandler  | Serial log output              |
//! | `nvs`         | StoragePort    | NVS / in-memory store          |
//! | `time`        | Clock          | ESP32 system timer / `Instant` |
//!
//! The CoAP transport is supplied by the application.

#[cfg(feature = "espidf")]
pub mod esp_image;
pub mod log_handler;
pub mod nvs;
pub mod time;
