pub mod stagg;
