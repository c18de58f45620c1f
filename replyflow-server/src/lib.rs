pub mod dialogflow;
pub mod http;
