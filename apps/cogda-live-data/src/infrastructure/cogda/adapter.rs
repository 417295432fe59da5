//! Wire Message Adapter
//!
//! Field-by-field mapping between catalog messages and [`WireMessage`]
//! containers. No business logic lives here: the adapter writes fields in
//! a fixed order and, when reading, fails on any missing mandatory field
//! instead of defaulting it.
//!
//! Every entry point that produces or consumes a full message takes the
//! [`WireContext`] explicitly.

use crate::domain::identifiers::{CorrelationId, NormalizationScheme, SubscriptionId};
use crate::domain::results::{ConnectionResult, GenericResult};
use crate::infrastructure::wire::{
    FieldValue, MalformedMessage, MsgPackCodec, WireContext, WireError, WireMessage,
};

use super::messages::{
    CogdaMessage, ConnectionRequest, ConnectionResponse, FeedRequest, LiveDataUpdate, MessageType,
    ResponseBuilder, ResponseFields, ResponseMessage, SnapshotResponse, SubscriptionResponse,
    fields,
};

// =============================================================================
// Shared Field Groups
// =============================================================================

/// Write a subscription id and optional normalization scheme.
///
/// Adds exactly two fields, or three when `scheme` is present, in the
/// order `subscriptionIdScheme`, `subscriptionIdValue`, `normalizationScheme`.
pub fn add_external_id(
    message: &mut WireMessage,
    id: &SubscriptionId,
    scheme: Option<&NormalizationScheme>,
) {
    message.add(fields::SUBSCRIPTION_ID_SCHEME, id.scheme());
    message.add(fields::SUBSCRIPTION_ID_VALUE, id.value());
    if let Some(scheme) = scheme {
        message.add(fields::NORMALIZATION_SCHEME, scheme.as_str());
    }
}

/// Read the subscription id written by [`add_external_id`].
///
/// # Errors
///
/// Returns an error if either half is missing, is not a string, or is empty.
pub fn read_external_id(message: &WireMessage) -> Result<SubscriptionId, MalformedMessage> {
    let scheme = require_str(message, fields::SUBSCRIPTION_ID_SCHEME)?;
    let value = require_str(message, fields::SUBSCRIPTION_ID_VALUE)?;

    SubscriptionId::new(scheme, value).map_err(|e| MalformedMessage::InvalidValue {
        field: fields::SUBSCRIPTION_ID_VALUE,
        reason: e.to_string(),
    })
}

/// Write the fields shared by every command response.
///
/// Order: `correlationId?`, `subscriptionIdScheme`, `subscriptionIdValue`,
/// `normalizationScheme?`, `genericResult`, `userMessage?`.
pub fn add_response_fields(message: &mut WireMessage, response: &ResponseFields) {
    if let Some(correlation_id) = response.correlation_id() {
        message.add(fields::CORRELATION_ID, correlation_id.get());
    }
    add_external_id(
        message,
        response.subscription_id(),
        response.normalization_scheme(),
    );
    message.add(fields::GENERIC_RESULT, response.generic_result().as_str());
    if let Some(user_message) = response.user_message() {
        message.add(fields::USER_MESSAGE, user_message);
    }
}

/// Populate `target` from the fields written by [`add_response_fields`].
///
/// # Errors
///
/// Returns an error if the subscription id or generic result is missing or
/// invalid, or an optional field has the wrong type.
pub fn set_response_fields(
    message: &WireMessage,
    target: &mut ResponseBuilder,
) -> Result<(), MalformedMessage> {
    if let Some(correlation_id) = read_correlation_id(message)? {
        target.correlation_id(correlation_id);
    }

    target.subscription_id(read_external_id(message)?);

    if let Some(scheme) = read_normalization_scheme(message)? {
        target.normalization_scheme(scheme);
    }

    let result = require_str(message, fields::GENERIC_RESULT)?;
    let result =
        result
            .parse::<GenericResult>()
            .map_err(|e| MalformedMessage::InvalidValue {
                field: fields::GENERIC_RESULT,
                reason: e.to_string(),
            })?;
    target.generic_result(result);

    if let Some(user_message) = optional_str(message, fields::USER_MESSAGE)? {
        target.user_message(user_message);
    }

    Ok(())
}

/// Build a complete outbound container for a command response.
///
/// Response fields, then the kind's payload field, then `MESSAGE_TYPE`.
///
/// # Errors
///
/// Returns [`WireError::TooDeep`] if the payload nests past the context limit.
pub fn build_command_response_message<R: ResponseMessage>(
    ctx: &WireContext,
    response: &R,
) -> Result<WireMessage, WireError> {
    let mut message = WireMessage::new();
    add_response_fields(&mut message, response.fields());
    message.add(R::PAYLOAD_FIELD, response.payload().clone());
    message.add(fields::MESSAGE_TYPE, R::MESSAGE_TYPE.as_str());
    ctx.check_depth(&message)?;
    Ok(message)
}

// =============================================================================
// Whole Messages
// =============================================================================

impl CogdaMessage {
    /// Map this message to its wire container.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::TooDeep`] if nested payloads exceed the context
    /// limit.
    pub fn to_wire(&self, ctx: &WireContext) -> Result<WireMessage, WireError> {
        let message = match self {
            Self::ConnectionRequest(request) => connection_request_to_wire(request),
            Self::ConnectionResponse(response) => connection_response_to_wire(response),
            Self::SubscriptionRequest(request) => {
                feed_request_to_wire(request, MessageType::SubscriptionRequest)
            }
            Self::SnapshotRequest(request) => {
                feed_request_to_wire(request, MessageType::SnapshotRequest)
            }
            Self::Unsubscribe(request) => feed_request_to_wire(request, MessageType::Unsubscribe),
            Self::SubscriptionResponse(response) => {
                return build_command_response_message(ctx, response);
            }
            Self::SnapshotResponse(response) => {
                return build_command_response_message(ctx, response);
            }
            Self::LiveDataUpdate(update) => update_to_wire(update),
        };
        ctx.check_depth(&message)?;
        Ok(message)
    }

    /// Decode a wire container into the matching message variant.
    ///
    /// # Errors
    ///
    /// Returns an error if the container nests too deep, `MESSAGE_TYPE` is
    /// missing or unknown, or a mandatory field is missing or invalid.
    pub fn from_wire(ctx: &WireContext, message: &WireMessage) -> Result<Self, WireError> {
        ctx.check_depth(message)?;

        let kind = require_str(message, fields::MESSAGE_TYPE)?.parse::<MessageType>()?;
        let decoded = match kind {
            MessageType::ConnectionRequest => {
                Self::ConnectionRequest(connection_request_from_wire(message)?)
            }
            MessageType::ConnectionResponse => {
                Self::ConnectionResponse(connection_response_from_wire(message)?)
            }
            MessageType::SubscriptionRequest => {
                Self::SubscriptionRequest(feed_request_from_wire(message)?)
            }
            MessageType::SnapshotRequest => Self::SnapshotRequest(feed_request_from_wire(message)?),
            MessageType::Unsubscribe => Self::Unsubscribe(feed_request_from_wire(message)?),
            MessageType::SubscriptionResponse => {
                let shared = response_fields_from_wire(message)?;
                let snapshot = require_message(message, fields::SNAPSHOT)?.clone();
                Self::SubscriptionResponse(SubscriptionResponse::new(shared, snapshot))
            }
            MessageType::SnapshotResponse => {
                let shared = response_fields_from_wire(message)?;
                let values = require_message(message, fields::VALUES)?.clone();
                Self::SnapshotResponse(SnapshotResponse::new(shared, values))
            }
            MessageType::LiveDataUpdate => Self::LiveDataUpdate(update_from_wire(message)?),
        };
        Ok(decoded)
    }
}

/// Map and encode a message to bytes.
///
/// # Errors
///
/// Returns an error if mapping or encoding fails.
pub fn encode_message(
    codec: &MsgPackCodec,
    ctx: &WireContext,
    message: &CogdaMessage,
) -> Result<Vec<u8>, WireError> {
    codec.encode(ctx, &message.to_wire(ctx)?)
}

/// Decode bytes and map them to a message.
///
/// # Errors
///
/// Returns an error if decoding or mapping fails.
pub fn decode_message(
    codec: &MsgPackCodec,
    ctx: &WireContext,
    data: &[u8],
) -> Result<CogdaMessage, WireError> {
    let wire = codec.decode(ctx, data)?;
    CogdaMessage::from_wire(ctx, &wire)
}

// =============================================================================
// Per-Kind Mapping
// =============================================================================

fn connection_request_to_wire(request: &ConnectionRequest) -> WireMessage {
    let mut message = WireMessage::new();
    message.add(fields::USER_NAME, request.user_name());
    if let Some(password) = request.password() {
        message.add(fields::PASSWORD, password);
    }
    message.add(fields::CAPABILITIES, request.capabilities().clone());
    message.add(fields::MESSAGE_TYPE, MessageType::ConnectionRequest.as_str());
    message
}

fn connection_request_from_wire(message: &WireMessage) -> Result<ConnectionRequest, MalformedMessage> {
    let mut builder = ConnectionRequest::builder()
        .user_name(require_str(message, fields::USER_NAME)?)
        .capabilities(require_message(message, fields::CAPABILITIES)?.clone());
    if let Some(password) = optional_str(message, fields::PASSWORD)? {
        builder = builder.password(password);
    }
    builder.build()
}

fn connection_response_to_wire(response: &ConnectionResponse) -> WireMessage {
    let mut message = WireMessage::new();
    message.add(fields::RESULT, response.result().as_str());
    message.add(fields::CAPABILITIES, response.capabilities().clone());
    for server in response.available_servers() {
        message.add(fields::AVAILABLE_SERVERS, server.as_str());
    }
    message.add(fields::MESSAGE_TYPE, MessageType::ConnectionResponse.as_str());
    message
}

fn connection_response_from_wire(
    message: &WireMessage,
) -> Result<ConnectionResponse, MalformedMessage> {
    let result = require_str(message, fields::RESULT)?
        .parse::<ConnectionResult>()
        .map_err(|e| MalformedMessage::InvalidValue {
            field: fields::RESULT,
            reason: e.to_string(),
        })?;

    let servers = message
        .get_all(fields::AVAILABLE_SERVERS)
        .map(|value| {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| wrong_type(fields::AVAILABLE_SERVERS, "string", value))
        })
        .collect::<Result<Vec<_>, _>>()?;

    ConnectionResponse::builder()
        .result(result)
        .capabilities(require_message(message, fields::CAPABILITIES)?.clone())
        .available_servers(servers)
        .build()
}

fn feed_request_to_wire(request: &FeedRequest, kind: MessageType) -> WireMessage {
    let mut message = WireMessage::new();
    if let Some(correlation_id) = request.correlation_id() {
        message.add(fields::CORRELATION_ID, correlation_id.get());
    }
    add_external_id(
        &mut message,
        request.subscription_id(),
        request.normalization_scheme(),
    );
    message.add(fields::MESSAGE_TYPE, kind.as_str());
    message
}

fn feed_request_from_wire(message: &WireMessage) -> Result<FeedRequest, MalformedMessage> {
    let mut request = FeedRequest::new(read_external_id(message)?);
    if let Some(correlation_id) = read_correlation_id(message)? {
        request = request.with_correlation_id(correlation_id);
    }
    if let Some(scheme) = read_normalization_scheme(message)? {
        request = request.with_normalization_scheme(scheme);
    }
    Ok(request)
}

fn response_fields_from_wire(message: &WireMessage) -> Result<ResponseFields, MalformedMessage> {
    let mut builder = ResponseFields::builder();
    set_response_fields(message, &mut builder)?;
    builder.build()
}

fn update_to_wire(update: &LiveDataUpdate) -> WireMessage {
    let mut message = WireMessage::new();
    add_external_id(
        &mut message,
        update.subscription_id(),
        update.normalization_scheme(),
    );
    message.add(fields::VALUES, update.values().clone());
    message.add(fields::MESSAGE_TYPE, MessageType::LiveDataUpdate.as_str());
    message
}

fn update_from_wire(message: &WireMessage) -> Result<LiveDataUpdate, MalformedMessage> {
    Ok(LiveDataUpdate::new(
        read_external_id(message)?,
        read_normalization_scheme(message)?,
        require_message(message, fields::VALUES)?.clone(),
    ))
}

// =============================================================================
// Field Readers
// =============================================================================

fn wrong_type(field: &'static str, expected: &'static str, found: &FieldValue) -> MalformedMessage {
    MalformedMessage::WrongType {
        field,
        expected,
        found: found.type_name(),
    }
}

fn require<'a>(message: &'a WireMessage, field: &'static str) -> Result<&'a FieldValue, MalformedMessage> {
    message.get(field).ok_or(MalformedMessage::MissingField(field))
}

fn require_str<'a>(message: &'a WireMessage, field: &'static str) -> Result<&'a str, MalformedMessage> {
    let value = require(message, field)?;
    value.as_str().ok_or_else(|| wrong_type(field, "string", value))
}

fn require_message<'a>(
    message: &'a WireMessage,
    field: &'static str,
) -> Result<&'a WireMessage, MalformedMessage> {
    let value = require(message, field)?;
    value
        .as_message()
        .ok_or_else(|| wrong_type(field, "message", value))
}

fn optional_str<'a>(
    message: &'a WireMessage,
    field: &'static str,
) -> Result<Option<&'a str>, MalformedMessage> {
    message
        .get(field)
        .map(|value| value.as_str().ok_or_else(|| wrong_type(field, "string", value)))
        .transpose()
}

fn read_correlation_id(message: &WireMessage) -> Result<Option<CorrelationId>, MalformedMessage> {
    message
        .get(fields::CORRELATION_ID)
        .map(|value| {
            value
                .as_i64()
                .map(CorrelationId::new)
                .ok_or_else(|| wrong_type(fields::CORRELATION_ID, "int", value))
        })
        .transpose()
}

fn read_normalization_scheme(
    message: &WireMessage,
) -> Result<Option<NormalizationScheme>, MalformedMessage> {
    optional_str(message, fields::NORMALIZATION_SCHEME)?
        .map(|name| {
            NormalizationScheme::new(name).map_err(|e| MalformedMessage::InvalidValue {
                field: fields::NORMALIZATION_SCHEME,
                reason: e.to_string(),
            })
        })
        .transpose()
}
