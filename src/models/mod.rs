pub mod monitor_model;
