/// Drives all futures to completion together. The first one to finish cancels
/// the token, which the others are expected to watch. Evaluates to the tuple of
/// their outputs.
#[macro_export]
macro_rules! run_all {
    ( $cancellation_token:expr, $( $fut:expr ),+ $(,)?) => {
        tokio::join!(
            $(
                async {
                    let result = $fut.await;
                    $cancellation_token.cancel();
                    result
                }
            ),*
        )
    };
}
