use crate::claude::create_message::types::BetaMessage;

pub type CreateMessageResponse = BetaMessage;
