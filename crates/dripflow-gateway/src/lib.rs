//! # Dripflow Gateway
//!
//! Outbound messaging over the WhatsApp Business Platform (Cloud API).

pub mod whatsapp;

pub use whatsapp::WhatsAppGateway;
