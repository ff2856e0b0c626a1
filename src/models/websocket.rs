use serde::{ Serialize, Deserialize };

use crate::models::core::Message;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join")] Join {
        token: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "joined")] Joined {
        token: String,
        #[serde(rename = "connectionId")]
        connection_id: String,
    },
    #[serde(rename = "newMessage")] NewMessage {
        message: Message,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
}
