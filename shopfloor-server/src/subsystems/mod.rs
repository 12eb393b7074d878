pub mod answer;
pub mod similar;
