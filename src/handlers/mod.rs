pub mod chunk_form;
pub mod health_handlers;
pub mod upload_handlers;
