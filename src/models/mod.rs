pub mod preresnet;
