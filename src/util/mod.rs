pub mod api_util;
pub mod cipher_util;
pub mod form;
pub mod payer;
