pub mod ldapi;
