//! Subscription loop over a board's channel pattern.

use crate::store::{Backend, StoreError};

use super::Event;

/// Subscribe to `board_id`'s channels and feed every decoded event to
/// `handler` until it returns `Ok(false)` or the board's
/// `lonely_board` sentinel arrives, then unsubscribe.
///
/// A failure while handling one message is logged and the loop moves
/// on to the next; one bad message never tears down the subscription.
pub async fn board_update_listener<F>(
    backend: &dyn Backend,
    board_id: &str,
    mut handler: F,
) -> Result<(), StoreError>
where
    F: FnMut(&Event, &str) -> Result<bool, StoreError> + Send,
{
    let pattern = format!("{board_id}*");
    let mut subscription = backend.subscribe_pattern(&pattern).await?;

    while let Some(message) = subscription.next().await {
        log::debug!("board listener received message on '{}'", message.channel);

        let event = match Event::from_payload(&message.payload) {
            Ok(event) => event,
            Err(err) => {
                log::error!("undecodable message on '{}': {err}", message.channel);
                continue;
            }
        };

        if event.is_sentinel_for(board_id) {
            break;
        }

        match handler(&event, board_id) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => log::error!("error handling message on '{}': {err}", message.channel),
        }
    }

    subscription.unsubscribe().await?;
    log::info!("subscription to '{pattern}' terminated");
    Ok(())
}
