pub mod circuitbreaker;
pub mod credentials;
pub mod modules;
pub mod proxy;
pub mod rest;
