use std::ffi::{c_int, c_void};

use crate::cutils::string_from_ptr;
use crate::log::{dev_debug, dev_warn};
use crate::rpassword::Terminal;

use super::sys::*;

use super::error::{pam_err, PamResult};
use super::{securemem::PamBuffer, PamError, PamErrorType};

/// Each message in a PAM conversation will have a message style. Each of these
/// styles must be handled separately.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PamMessageStyle {
    /// Prompt for input using a message. The input should considered secret
    /// and should be hidden from view.
    PromptEchoOff = PAM_PROMPT_ECHO_OFF as isize,
    /// Prompt for input using a message. The input does not have to be
    /// considered a secret and may be displayed to the user.
    PromptEchoOn = PAM_PROMPT_ECHO_ON as isize,
    /// Display an error message. The user should not be prompted for any input.
    ErrorMessage = PAM_ERROR_MSG as isize,
    /// Display some informational text. The user should not be prompted for any
    /// input.
    TextInfo = PAM_TEXT_INFO as isize,
}

impl PamMessageStyle {
    pub fn from_int(val: c_int) -> Option<PamMessageStyle> {
        use PamMessageStyle::*;

        match val as _ {
            PAM_PROMPT_ECHO_OFF => Some(PromptEchoOff),
            PAM_PROMPT_ECHO_ON => Some(PromptEchoOn),
            PAM_ERROR_MSG => Some(ErrorMessage),
            PAM_TEXT_INFO => Some(TextInfo),
            _ => None,
        }
    }

    pub fn is_prompt(self) -> bool {
        matches!(self, PamMessageStyle::PromptEchoOff | PamMessageStyle::PromptEchoOn)
    }
}

/// One message of a conversation round, as sent by a PAM module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationMessage {
    pub style: PamMessageStyle,
    pub text: String,
}

impl ConversationMessage {
    pub fn new(style: PamMessageStyle, text: impl Into<String>) -> Self {
        ConversationMessage {
            style,
            text: text.into(),
        }
    }
}

/// The answer to a single message. Prompts are normally answered with text;
/// informational and error messages normally are not.
#[derive(Debug)]
pub struct ConversationResponse(Option<PamBuffer>);

impl ConversationResponse {
    pub fn text(&self) -> Option<&[u8]> {
        self.0.as_ref().map(|buf| buf.as_bytes())
    }

    pub fn into_buffer(self) -> Option<PamBuffer> {
        self.0
    }
}

/// Answers the messages of a conversation one at a time.
pub trait ConversationHandler {
    /// Respond to a single message. An `Err` aborts the whole round.
    fn respond(&mut self, style: PamMessageStyle, msg: &str) -> PamResult<Option<PamBuffer>>;
}

pub trait Converser {
    /// Handle a normal prompt, i.e. present some message and ask for a value.
    /// The value is not considered a secret.
    fn handle_normal_prompt(&self, msg: &str) -> PamResult<PamBuffer>;

    /// Handle a hidden prompt, i.e. present some message and ask for a value.
    /// The value is considered secret and should not be visible.
    fn handle_hidden_prompt(&self, msg: &str) -> PamResult<PamBuffer>;

    /// Display an error message to the user, the user does not need to input a
    /// value.
    fn handle_error(&self, msg: &str) -> PamResult<()>;

    /// Display an informational message to the user, the user does not need to
    /// input a value.
    fn handle_info(&self, msg: &str) -> PamResult<()>;
}

impl<C: Converser> ConversationHandler for C {
    fn respond(&mut self, style: PamMessageStyle, msg: &str) -> PamResult<Option<PamBuffer>> {
        use PamMessageStyle::*;

        match style {
            PromptEchoOn => self.handle_normal_prompt(msg).map(Some),
            PromptEchoOff => self.handle_hidden_prompt(msg).map(Some),
            ErrorMessage => self.handle_error(msg).map(|()| None),
            TextInfo => self.handle_info(msg).map(|()| None),
        }
    }
}

/// Use a plain function or closure as a [`ConversationHandler`].
pub struct ResponseFn<F>(pub F);

impl<F> ResponseFn<F>
where
    F: FnMut(PamMessageStyle, &str) -> PamResult<Option<PamBuffer>>,
{
    pub fn new(respond: F) -> Self {
        ResponseFn(respond)
    }
}

impl<F> ConversationHandler for ResponseFn<F>
where
    F: FnMut(PamMessageStyle, &str) -> PamResult<Option<PamBuffer>>,
{
    fn respond(&mut self, style: PamMessageStyle, msg: &str) -> PamResult<Option<PamBuffer>> {
        (self.0)(style, msg)
    }
}

/// Run one conversation round: ask `handler` about every message, in order.
///
/// Either every message gets its response, or the round fails as a whole.
/// Responses collected before a failing message are wiped and freed here.
pub fn converse<H: ConversationHandler + ?Sized>(
    handler: &mut H,
    messages: &[ConversationMessage],
) -> PamResult<Vec<ConversationResponse>> {
    let mut responses = Vec::new();
    responses
        .try_reserve_exact(messages.len())
        .map_err(|_| PamError::AllocationFailure)?;

    for (position, message) in messages.iter().enumerate() {
        match handler.respond(message.style, &message.text) {
            Ok(response) => responses.push(ConversationResponse(response)),
            Err(err) => {
                dev_debug!(
                    "conversation aborted at message {position} of {}: {err}",
                    messages.len()
                );
                return Err(PamError::HandlerFailure {
                    position,
                    source: Box::new(err),
                });
            }
        }
    }

    Ok(responses)
}

/// Settings of the terminal based converser.
#[derive(Clone, Debug, Default)]
pub struct ConverserConfig {
    /// Shown in front of every message, e.g. `[name] message`.
    pub name: String,
    /// Talk over stdin/stderr instead of opening /dev/tty.
    pub use_stdin: bool,
    /// Ring the bell before asking for a secret.
    pub bell: bool,
    /// Refuse every prompt.
    pub no_interact: bool,
    /// Put in front of hidden prompts; `None` leaves them as PAM sent them.
    pub auth_prompt: Option<String>,
}

/// A converser that uses the terminal (or stdin/stderr) to display messages
/// and to request input from the user.
pub struct CLIConverser {
    config: ConverserConfig,
}

impl CLIConverser {
    pub fn new(config: ConverserConfig) -> Self {
        CLIConverser { config }
    }

    fn open(&self) -> PamResult<Terminal> {
        if self.config.use_stdin {
            Ok(Terminal::open_stdie())
        } else {
            Terminal::open_tty()
        }
    }

    fn hidden_prompt_text(&self, msg: &str) -> String {
        match self.config.auth_prompt.as_deref() {
            None => msg.to_string(),
            Some(prompt) => format!("[{}: {prompt}] {msg}", self.config.name),
        }
    }
}

impl Converser for CLIConverser {
    fn handle_normal_prompt(&self, msg: &str) -> PamResult<PamBuffer> {
        if self.config.no_interact {
            return Err(PamError::InteractionRequired);
        }
        let mut tty = self.open()?;
        tty.read_input(&format!("[{}: input needed] {msg} ", self.config.name), false)
    }

    fn handle_hidden_prompt(&self, msg: &str) -> PamResult<PamBuffer> {
        if self.config.no_interact {
            return Err(PamError::InteractionRequired);
        }
        let mut tty = self.open()?;
        if self.config.bell && !self.config.use_stdin {
            tty.bell()?;
        }
        tty.read_input(&self.hidden_prompt_text(msg), true)
    }

    fn handle_error(&self, msg: &str) -> PamResult<()> {
        let mut tty = self.open()?;
        Ok(tty.prompt(&format!("[{} error] {msg}\n", self.config.name))?)
    }

    fn handle_info(&self, msg: &str) -> PamResult<()> {
        let mut tty = self.open()?;
        Ok(tty.prompt(&format!("[{}] {msg}\n", self.config.name))?)
    }
}

/// What the conversation function can reach through `appdata_ptr`.
pub(super) struct ConversationState<H> {
    pub(super) handler: H,
    // pam_authenticate does not return error codes returned by the conversation
    // function; these are set by the conversation function instead of returning
    // multiple error codes.
    pub(super) error: Option<PamError>,
    pub(super) panicked: bool,
}

impl<H> ConversationState<H> {
    pub(super) fn new(handler: H) -> Self {
        ConversationState {
            handler,
            error: None,
            panicked: false,
        }
    }

    /// Keep the first failure of a PAM call; later ones are consequences of it.
    fn record(&mut self, err: PamError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Turn the `status` of a PAM call that may have conversed into a result.
    ///
    /// A panic in the handler is resumed here. An error recorded during the
    /// conversation is more telling than the status PAM made of it, so that
    /// one is returned (and forgotten) first.
    #[cfg_attr(not(feature = "libpam"), allow(dead_code))]
    pub(super) fn settle(&mut self, status: c_int) -> PamResult<()> {
        if self.panicked {
            panic!("Panic during pam conversation");
        }

        if let Some(error) = self.error.take() {
            return Err(error);
        }

        pam_err(status)
    }
}

/// Copy the messages PAM handed us into owned Rust values.
///
/// # Safety
/// `msg` must point to `num_msg` valid pointers to `pam_message` structs whose
/// texts are NUL-terminated (or null).
unsafe fn collect_messages(
    num_msg: usize,
    msg: *mut *const pam_message,
) -> PamResult<Vec<ConversationMessage>> {
    let mut messages = Vec::with_capacity(num_msg);
    for i in 0..num_msg {
        // SAFETY: the PAM contract ensures that `num_msg` does not exceed the amount
        // of messages presented to this function in `msg`, and that it is not being
        // written to at the same time as we are reading it. Note that the reference
        // we create does not escape this loopy body.
        let message: &pam_message = unsafe { &**msg.add(i) };

        let style = PamMessageStyle::from_int(message.msg_style)
            .ok_or(PamError::UnknownMessageStyle(message.msg_style))?;

        // SAFETY: PAM ensures that the messages passed are properly null-terminated
        let text = unsafe { string_from_ptr(message.msg) };

        messages.push(ConversationMessage { style, text });
    }

    Ok(messages)
}

/// Hand the responses over to PAM as a `calloc`ed array of `pam_response`.
/// On failure nothing is handed over and every buffer is released.
fn into_pam_responses(responses: Vec<ConversationResponse>) -> PamResult<*mut pam_response> {
    // Allocate enough memory for the responses, which are initialized with zero.
    // Never ask for zero bytes: calloc may legitimately answer that with NULL.
    // SAFETY: this will either allocate the required amount of (initialized) bytes,
    // or return a null pointer.
    let temp_resp = unsafe {
        libc::calloc(
            responses.len().max(1) as libc::size_t,
            std::mem::size_of::<pam_response>() as libc::size_t,
        )
    } as *mut pam_response;
    if temp_resp.is_null() {
        return Err(PamError::AllocationFailure);
    }

    for (i, response) in responses.into_iter().enumerate() {
        // SAFETY: `i` stays below the number of elements allocated above, so
        // `temp_resp` has allocated-and-initialized data at the required offset
        // that only we have a writable pointer to.
        let slot: &mut pam_response = unsafe { &mut *(temp_resp.add(i)) };

        if let Some(secbuf) = response.into_buffer() {
            slot.resp = secbuf.leak().as_ptr().cast();
        }
    }

    Ok(temp_resp)
}

/// This function implements the conversation function of `pam_conv`.
///
/// This function should always be called with an appdata_ptr that points to a
/// `ConversationState<H>`. It collects the messages provided into owned
/// values, runs them through [`converse`] and converts the replies back to the
/// C interface. If the round fails, PAM receives no responses at all and the
/// error is kept in the state for the caller of the PAM function. This
/// function tries to catch any unwinding panics and sets state to indicate
/// that a panic occurred.
///
/// # Safety
/// * If called with an appdata_ptr that does not correspond with the handler
///   type this function will exhibit undefined behavior.
/// * The messages from PAM are assumed to be formatted correctly.
pub(super) unsafe extern "C" fn converse_callback<H: ConversationHandler>(
    num_msg: c_int,
    msg: *mut *const pam_message,
    response: *mut *mut pam_response,
    appdata_ptr: *mut c_void,
) -> c_int {
    if msg.is_null() || response.is_null() || appdata_ptr.is_null() {
        return PamErrorType::BufferError.as_int();
    }
    let num_msg = match usize::try_from(num_msg) {
        Ok(n) if n <= PAM_MAX_NUM_MSG as usize => n,
        _ => return PamErrorType::ConversationError.as_int(),
    };

    let result = std::panic::catch_unwind(|| {
        // SAFETY: appdata_ptr contains the `*mut ConversationState` that is untouched by PAM
        let state = unsafe { &mut *(appdata_ptr as *mut ConversationState<H>) };

        // SAFETY: checked for null above, the rest is up to PAM
        let messages = match unsafe { collect_messages(num_msg, msg) } {
            Ok(messages) => messages,
            Err(err) => {
                // early return if there is a failure to convert, pam would have given us nonsense
                dev_warn!("{err}");
                let status = err.conversation_status();
                state.record(err);
                return status;
            }
        };

        // an earlier round already failed; do not ask the user anything else
        if state.error.is_some() && messages.iter().any(|m| m.style.is_prompt()) {
            return PamErrorType::ConversationError;
        }

        let pam_responses = converse(&mut state.handler, &messages).and_then(into_pam_responses);
        match pam_responses {
            Ok(pam_responses) => {
                // SAFETY: PAM contract says that we are passed a valid, non-null, writeable pointer here.
                unsafe { *response = pam_responses };
                PamErrorType::Success
            }
            Err(err) => {
                let status = err.conversation_status();
                state.record(err);
                status
            }
        }
    });

    // handle any unwinding panics that occurred here
    let res = match result {
        Ok(r) => r,
        Err(_) => {
            // notify caller that a panic has occurred
            // SAFETY: appdata_ptr contains the `*mut ConversationState` that is untouched by PAM
            let state = unsafe { &mut *(appdata_ptr as *mut ConversationState<H>) };
            state.panicked = true;

            PamErrorType::ConversationError
        }
    };
    res.as_int()
}

#[allow(clippy::undocumented_unsafe_blocks)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::pam::securemem::live;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;
    use PamMessageStyle::*;

    fn buf(text: &str) -> PamBuffer {
        PamBuffer::from_bytes(text.as_bytes().to_vec()).unwrap()
    }

    fn msg(style: PamMessageStyle, text: &str) -> ConversationMessage {
        ConversationMessage::new(style, text)
    }

    fn texts(responses: &[ConversationResponse]) -> Vec<Option<String>> {
        responses
            .iter()
            .map(|r| r.text().map(|t| String::from_utf8(t.to_vec()).unwrap()))
            .collect()
    }

    impl Converser for String {
        fn handle_normal_prompt(&self, msg: &str) -> PamResult<PamBuffer> {
            Ok(buf(&format!("{self} says {msg}")))
        }

        fn handle_hidden_prompt(&self, msg: &str) -> PamResult<PamBuffer> {
            Ok(buf(msg))
        }

        fn handle_error(&self, msg: &str) -> PamResult<()> {
            panic!("{msg}")
        }

        fn handle_info(&self, _msg: &str) -> PamResult<()> {
            Ok(())
        }
    }

    #[test]
    fn all_messages_answered_in_order() {
        let calls = Cell::new(0);
        let mut handler = ResponseFn::new(|style, text| {
            calls.set(calls.get() + 1);
            Ok(Some(buf(&format!("{style:?}:{text}"))))
        });
        let messages = [
            msg(PromptEchoOn, "login"),
            msg(PromptEchoOff, "password"),
            msg(TextInfo, "welcome"),
        ];

        let responses = converse(&mut handler, &messages).unwrap();
        assert_eq!(calls.get(), 3);
        assert_eq!(
            texts(&responses),
            vec![
                Some("PromptEchoOn:login".to_string()),
                Some("PromptEchoOff:password".to_string()),
                Some("TextInfo:welcome".to_string()),
            ]
        );
    }

    #[test]
    fn failure_stops_dispatch_and_releases_buffers() {
        let before = live::count();
        let seen = Cell::new(0);
        let mut handler = ResponseFn::new(|_, text| {
            seen.set(seen.get() + 1);
            if text == "second" {
                Err(PamError::InteractionRequired)
            } else {
                Ok(Some(buf(text)))
            }
        });
        let messages = [
            msg(PromptEchoOff, "first"),
            msg(PromptEchoOff, "second"),
            msg(PromptEchoOff, "third"),
        ];

        let err = converse(&mut handler, &messages).unwrap_err();
        assert!(matches!(
            err,
            PamError::HandlerFailure { position: 1, ref source }
                if matches!(**source, PamError::InteractionRequired)
        ));
        // the third message was never shown to the handler
        assert_eq!(seen.get(), 2);
        assert_eq!(live::count(), before);
    }

    #[test]
    fn failure_at_every_position_leaks_nothing() {
        let messages: Vec<_> = (0..6).map(|i| msg(PromptEchoOn, &i.to_string())).collect();
        for fail_at in 0..messages.len() {
            let before = live::count();
            let mut handler = ResponseFn::new(|_, text| {
                if text == fail_at.to_string() {
                    Err(PamError::TtyRequired)
                } else {
                    Ok(Some(buf(text)))
                }
            });
            assert!(converse(&mut handler, &messages).is_err());
            assert_eq!(live::count(), before, "leak when failing at {fail_at}");
        }
    }

    #[test]
    fn empty_round_succeeds() {
        let mut handler = "tux".to_string();
        assert!(converse(&mut handler, &[]).unwrap().is_empty());
    }

    #[test]
    fn converser_answers_by_style() {
        let mut handler = "tux".to_string();
        let responses = converse(
            &mut handler,
            &[
                msg(PromptEchoOff, "banging the rocks together"),
                msg(TextInfo, ""),
                msg(PromptEchoOn, ""),
            ],
        )
        .unwrap();
        assert_eq!(
            texts(&responses),
            vec![
                Some("banging the rocks together".to_string()),
                None,
                Some("tux says ".to_string()),
            ]
        );
    }

    #[test]
    fn no_interact_refuses_prompts_but_not_info() {
        let converser = CLIConverser::new(ConverserConfig {
            name: "test".to_string(),
            no_interact: true,
            ..Default::default()
        });
        assert!(matches!(
            converser.handle_normal_prompt("login:"),
            Err(PamError::InteractionRequired)
        ));
        assert!(matches!(
            converser.handle_hidden_prompt("Password:"),
            Err(PamError::InteractionRequired)
        ));
    }

    #[test]
    fn hidden_prompt_decoration() {
        let mut config = ConverserConfig {
            name: "pamauth".to_string(),
            auth_prompt: Some("authenticate".to_string()),
            ..Default::default()
        };
        assert_eq!(
            CLIConverser::new(config.clone()).hidden_prompt_text("Password: "),
            "[pamauth: authenticate] Password: "
        );
        config.auth_prompt = None;
        assert_eq!(
            CLIConverser::new(config).hidden_prompt_text("Password: "),
            "Password: "
        );
    }

    // essentially do the inverse of the "conversation function"
    fn dummy_pam(
        msgs: &[(c_int, &str)],
        conv: &pam_conv,
    ) -> Result<Vec<Option<String>>, c_int> {
        let texts: Vec<std::ffi::CString> = msgs
            .iter()
            .map(|(_, text)| std::ffi::CString::new(*text).unwrap())
            .collect();
        let pam_msgs: Vec<pam_message> = msgs
            .iter()
            .zip(&texts)
            .map(|((style, _), text)| pam_message {
                msg_style: *style,
                msg: text.as_ptr(),
            })
            .collect();
        let mut ptrs: Vec<*const pam_message> =
            pam_msgs.iter().map(|m| m as *const pam_message).collect();

        let mut raw_response = std::ptr::null_mut::<pam_response>();
        let conv_err = unsafe {
            conv.conv.expect("non-null fn ptr")(
                ptrs.len() as i32,
                ptrs.as_mut_ptr(),
                &mut raw_response,
                conv.appdata_ptr,
            )
        };

        if conv_err != PAM_SUCCESS as c_int {
            // nothing may be handed out on failure
            assert!(raw_response.is_null());
            return Err(conv_err);
        }

        let result = (0..msgs.len())
            .map(|i| unsafe {
                let ptr = raw_response.add(i);
                if (*ptr).resp.is_null() {
                    None
                } else {
                    // "The resp_retcode member of this struct is unused and should be set to zero."
                    assert_eq!((*ptr).resp_retcode, 0);
                    let response = string_from_ptr((*ptr).resp);
                    libc::free((*ptr).resp as *mut _);
                    Some(response)
                }
            })
            .collect();

        unsafe { libc::free(raw_response as *mut _) };
        Ok(result)
    }

    fn pam_conv_for<H: ConversationHandler>(state: &mut Box<ConversationState<H>>) -> pam_conv {
        pam_conv {
            conv: Some(converse_callback::<H>),
            appdata_ptr: (&mut **state) as *mut ConversationState<H> as *mut c_void,
        }
    }

    const ECHO_OFF: c_int = PAM_PROMPT_ECHO_OFF as c_int;
    const ECHO_ON: c_int = PAM_PROMPT_ECHO_ON as c_int;
    const INFO: c_int = PAM_TEXT_INFO as c_int;
    const ERROR: c_int = PAM_ERROR_MSG as c_int;

    #[test]
    fn miri_pam_gpt() {
        let mut state = Box::new(ConversationState::new("tux".to_string()));
        let conv = pam_conv_for(&mut state);

        assert_eq!(dummy_pam(&[], &conv), Ok(vec![]));

        assert_eq!(
            dummy_pam(&[(ECHO_ON, "hello")], &conv),
            Ok(vec![Some("tux says hello".to_string())])
        );

        assert_eq!(
            dummy_pam(&[(ECHO_OFF, "fish")], &conv),
            Ok(vec![Some("fish".to_string())])
        );

        assert_eq!(dummy_pam(&[(INFO, "mars")], &conv), Ok(vec![None]));

        assert_eq!(
            dummy_pam(
                &[(ECHO_OFF, "banging the rocks together"), (INFO, ""), (ECHO_ON, "")],
                &conv
            ),
            Ok(vec![
                Some("banging the rocks together".to_string()),
                None,
                Some("tux says ".to_string()),
            ])
        );

        assert!(!state.panicked);

        assert_eq!(
            dummy_pam(&[(ERROR, "oops")], &conv),
            Err(PAM_CONV_ERR as c_int)
        );

        assert!(state.panicked);
    }

    #[test]
    fn callback_failure_hands_out_nothing() {
        let before = live::count();
        let mut state = Box::new(ConversationState::new(ResponseFn::new(
            |_, text| match text {
                "fail" => Err(PamError::InteractionRequired),
                _ => Ok(Some(buf(text))),
            },
        )));
        let conv = pam_conv_for(&mut state);

        assert_eq!(
            dummy_pam(&[(ECHO_ON, "a"), (ECHO_OFF, "fail"), (ECHO_ON, "c")], &conv),
            Err(PAM_CONV_ERR as c_int)
        );
        assert_eq!(live::count(), before);
        assert!(matches!(
            state.error,
            Some(PamError::HandlerFailure { position: 1, .. })
        ));

        // after a failed round, prompts are refused but text still gets through
        assert_eq!(
            dummy_pam(&[(ECHO_ON, "again")], &conv),
            Err(PAM_CONV_ERR as c_int)
        );
        assert_eq!(dummy_pam(&[(INFO, "bye")], &conv), Ok(vec![Some("bye".to_string())]));
    }

    #[test]
    fn first_failure_of_a_call_is_kept() {
        let mut state = Box::new(ConversationState::new(ResponseFn::new(
            |_, text| match text {
                "who are you" => Err(PamError::InteractionRequired),
                "goodbye" => Err(PamError::TtyRequired),
                _ => Ok(None),
            },
        )));
        let conv = pam_conv_for(&mut state);

        assert_eq!(
            dummy_pam(&[(ECHO_ON, "who are you")], &conv),
            Err(PAM_CONV_ERR as c_int)
        );
        assert_eq!(
            dummy_pam(&[(INFO, "goodbye")], &conv),
            Err(PAM_CONV_ERR as c_int)
        );
        assert!(matches!(
            state.error,
            Some(PamError::HandlerFailure { position: 0, ref source })
                if matches!(**source, PamError::InteractionRequired)
        ));
    }

    #[test]
    fn recorded_error_beats_pam_status() {
        let mut state = Box::new(ConversationState::new(ResponseFn::new(|_, text| {
            match text {
                "fail" => Err(PamError::InteractionRequired),
                _ => Ok(None),
            }
        })));
        let conv = pam_conv_for(&mut state);

        // libpam would turn the failed round into PAM_AUTH_ERR
        let _ = dummy_pam(&[(ECHO_OFF, "fail")], &conv);
        assert!(matches!(
            state.settle(PAM_AUTH_ERR as c_int),
            Err(PamError::HandlerFailure { position: 0, .. })
        ));

        // the error was taken, so the next call only sees its own status
        assert!(state.error.is_none());
        assert!(matches!(
            state.settle(PAM_AUTH_ERR as c_int),
            Err(PamError::Pam(PamErrorType::AuthError))
        ));
        assert!(state.settle(PAM_SUCCESS as c_int).is_ok());
    }

    #[test]
    fn recorded_error_beats_success() {
        let mut state = ConversationState::new("tux".to_string());
        state.error = Some(PamError::TtyRequired);
        assert!(matches!(
            state.settle(PAM_SUCCESS as c_int),
            Err(PamError::TtyRequired)
        ));
    }

    #[test]
    #[should_panic(expected = "Panic during pam conversation")]
    fn handler_panic_is_resumed() {
        let mut state = Box::new(ConversationState::new("tux".to_string()));
        let conv = pam_conv_for(&mut state);

        // the String converser panics on error messages
        assert_eq!(
            dummy_pam(&[(ERROR, "oops")], &conv),
            Err(PAM_CONV_ERR as c_int)
        );
        let _ = state.settle(PAM_CONV_ERR as c_int);
    }

    #[test]
    fn unknown_style_is_a_conversation_error() {
        let mut state = Box::new(ConversationState::new("tux".to_string()));
        let conv = pam_conv_for(&mut state);

        assert_eq!(
            dummy_pam(&[(ECHO_ON, "fine"), (42, "radio")], &conv),
            Err(PAM_CONV_ERR as c_int)
        );
        assert!(matches!(state.error, Some(PamError::UnknownMessageStyle(42))));
    }

    #[test]
    fn callback_rejects_null_pointers_and_bad_counts() {
        let mut state = Box::new(ConversationState::new("tux".to_string()));
        let conv = pam_conv_for(&mut state);
        let callback = conv.conv.unwrap();

        let text = std::ffi::CString::new("hi").unwrap();
        let message = pam_message {
            msg_style: ECHO_ON,
            msg: text.as_ptr(),
        };
        let mut msg_ptr = &message as *const pam_message;
        let mut responses = std::ptr::null_mut::<pam_response>();

        let status = unsafe {
            callback(1, std::ptr::null_mut(), &mut responses, conv.appdata_ptr)
        };
        assert_eq!(status, PAM_BUF_ERR as c_int);

        let status = unsafe {
            callback(1, &mut msg_ptr, std::ptr::null_mut(), conv.appdata_ptr)
        };
        assert_eq!(status, PAM_BUF_ERR as c_int);

        let status = unsafe {
            callback(1, &mut msg_ptr, &mut responses, std::ptr::null_mut())
        };
        assert_eq!(status, PAM_BUF_ERR as c_int);

        let status = unsafe { callback(-1, &mut msg_ptr, &mut responses, conv.appdata_ptr) };
        assert_eq!(status, PAM_CONV_ERR as c_int);

        let too_many = PAM_MAX_NUM_MSG as c_int + 1;
        let status = unsafe { callback(too_many, &mut msg_ptr, &mut responses, conv.appdata_ptr) };
        assert_eq!(status, PAM_CONV_ERR as c_int);

        assert!(responses.is_null());
        assert!(state.error.is_none());
    }
}
