use std::ffi::{c_int, c_void, CStr, CString, OsStr, OsString};
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;
use std::ptr::NonNull;

use crate::log::dev_info;

use super::converse::{converse_callback, ConversationHandler, ConversationState};
use super::error::pam_err;
use super::sys::*;
use super::{PamError, PamErrorType, PamResult};

/// The string items of a PAM transaction. The conversation item is managed by
/// [`PamContext`] itself and cannot be swapped out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PamItem {
    Service,
    User,
    Tty,
    RemoteHost,
    RemoteUser,
    UserPrompt,
}

impl PamItem {
    fn as_int(self) -> c_int {
        use PamItem::*;

        (match self {
            Service => PAM_SERVICE,
            User => PAM_USER,
            Tty => PAM_TTY,
            RemoteHost => PAM_RHOST,
            RemoteUser => PAM_RUSER,
            UserPrompt => PAM_USER_PROMPT,
        }) as c_int
    }
}

/// What `pam_setcred` should do with the user's credentials.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialAction {
    Establish,
    Delete,
    Reinitialize,
    Refresh,
}

impl CredentialAction {
    fn as_flag(self) -> c_int {
        use CredentialAction::*;

        (match self {
            Establish => PAM_ESTABLISH_CRED,
            Delete => PAM_DELETE_CRED,
            Reinitialize => PAM_REINITIALIZE_CRED,
            Refresh => PAM_REFRESH_CRED,
        }) as c_int
    }
}

/// A PAM transaction whose conversation is answered by `H`.
pub struct PamContext<H: ConversationHandler> {
    data_ptr: *mut ConversationState<H>,
    pamh: *mut pam_handle_t,
    silent: bool,
    allow_null_auth_token: bool,
    session_started: bool,
    last_pam_status: Option<c_int>,
}

impl<H: ConversationHandler> PamContext<H> {
    /// Start a transaction for `service_name`.
    ///
    /// The target user is optional and may also be set after the context was
    /// constructed or not set at all in which case PAM will ask for a
    /// username.
    pub fn new(service_name: &str, target_user: Option<&str>, handler: H) -> PamResult<Self> {
        let c_service_name = CString::new(service_name)?;
        let c_user = target_user.map(CString::new).transpose()?;
        let c_user_ptr = match c_user {
            Some(ref c) => c.as_ptr(),
            None => std::ptr::null(),
        };

        // this will be de-allocated explicitly in this type's drop method
        let data_ptr = Box::into_raw(Box::new(ConversationState::new(handler)));

        let mut pamh = std::ptr::null_mut();
        // SAFETY: we are passing the required fields to `pam_start`; in particular, the value
        // of `pamh` set above is not used, but will be overwritten by `pam_start`. PAM copies
        // the `pam_conv` struct, so it may live on the stack.
        let res = unsafe {
            pam_start(
                c_service_name.as_ptr(),
                c_user_ptr,
                &pam_conv {
                    conv: Some(converse_callback::<H>),
                    appdata_ptr: data_ptr as *mut c_void,
                },
                &mut pamh,
            )
        };

        if let Err(err) = pam_err(res) {
            // SAFETY: data_ptr was created by Box::into_raw and PAM did not keep it
            drop(unsafe { Box::from_raw(data_ptr) });
            return Err(err);
        }

        assert!(!pamh.is_null());
        dev_info!("started PAM transaction for service {service_name}");

        Ok(PamContext {
            data_ptr,
            pamh,
            silent: false,
            allow_null_auth_token: true,
            session_started: false,
            last_pam_status: None,
        })
    }

    /// Set whether output of pam calls should be silent or not, by default
    /// PAM calls are not silent.
    pub fn mark_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Set whether or not to allow empty authentication tokens, by default such
    /// tokens are allowed.
    pub fn mark_allow_null_auth_token(&mut self, allow: bool) {
        self.allow_null_auth_token = allow;
    }

    /// Get the PAM flag value for the silent flag
    fn silent_flag(&self) -> c_int {
        if self.silent {
            PAM_SILENT as c_int
        } else {
            0
        }
    }

    /// Get the PAM flag value for the disallow_null_authtok flag
    fn disallow_null_auth_token_flag(&self) -> c_int {
        if self.allow_null_auth_token {
            0
        } else {
            PAM_DISALLOW_NULL_AUTHTOK as c_int
        }
    }

    /// Run a PAM function that may converse with the user.
    fn conversing_call(&mut self, call: impl FnOnce(*mut pam_handle_t) -> c_int) -> PamResult<()> {
        let status = call(self.pamh);
        self.last_pam_status = Some(status);

        // SAFETY: self.data_ptr was created by Box::into_raw
        unsafe { (*self.data_ptr).settle(status) }
    }

    /// Run authentication for the account
    pub fn authenticate(&mut self, for_user: &str) -> PamResult<()> {
        let flags = self.silent_flag() | self.disallow_null_auth_token_flag();

        // SAFETY: `pamh` contains a correct handle (obtained from `pam_start`)
        self.conversing_call(|pamh| unsafe { pam_authenticate(pamh, flags) })?;

        // Check that no PAM module changed the user.
        let pam_user = self.get_user()?;
        if pam_user != for_user {
            return Err(PamError::InvalidUser(pam_user, for_user.to_string()));
        }

        Ok(())
    }

    /// Check that the account is valid
    pub fn validate_account(&mut self) -> PamResult<()> {
        let flags = self.silent_flag() | self.disallow_null_auth_token_flag();

        // SAFETY: `pamh` contains a correct handle (obtained from `pam_start`)
        self.conversing_call(|pamh| unsafe { pam_acct_mgmt(pamh, flags) })
    }

    /// Attempt to validate the account, if that fails because the authentication
    /// token is outdated, then an update of the authentication token is requested.
    pub fn validate_account_or_change_auth_token(&mut self) -> PamResult<()> {
        match self.validate_account() {
            Ok(()) => Ok(()),
            Err(PamError::Pam(PamErrorType::NewAuthTokenRequired)) => {
                self.change_auth_token(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the user to change the authentication token (password).
    ///
    /// If `expired_only` is set to true, only expired authentication tokens
    /// will be asked to be replaced, otherwise a replacement will always be
    /// requested.
    pub fn change_auth_token(&mut self, expired_only: bool) -> PamResult<()> {
        let mut flags = self.silent_flag();
        if expired_only {
            flags |= PAM_CHANGE_EXPIRED_AUTHTOK as c_int;
        }
        // SAFETY: `pamh` contains a correct handle (obtained from `pam_start`).
        self.conversing_call(|pamh| unsafe { pam_chauthtok(pamh, flags) })
    }

    /// Updates to the credentials stored in PAM
    pub fn credentials(&mut self, action: CredentialAction) -> PamResult<()> {
        let flags = action.as_flag() | self.silent_flag();

        // SAFETY: `pamh` contains a correct handle (obtained from `pam_start`).
        self.conversing_call(|pamh| unsafe { pam_setcred(pamh, flags) })
    }

    /// Start a user session for the authenticated user.
    pub fn open_session(&mut self) -> PamResult<()> {
        if self.session_started {
            return Ok(());
        }

        let flags = self.silent_flag();
        // SAFETY: `pamh` contains a correct handle (obtained from `pam_start`).
        self.conversing_call(|pamh| unsafe { pam_open_session(pamh, flags) })?;
        self.session_started = true;
        Ok(())
    }

    /// End the user session.
    pub fn close_session(&mut self) {
        // closing the pam session is best effort, if any error occurs we cannot
        // do anything with it
        if self.session_started {
            // SAFETY: `self.pamh` contains a correct handle (obtained from `pam_start`).
            let _ = pam_err(unsafe { pam_close_session(self.pamh, self.silent_flag()) });
            self.session_started = false;
        }
    }

    /// Set, change or (with a bare `name`) remove a variable of the PAM
    /// environment. `name_value` has the form `name=value`.
    pub fn put_env(&mut self, name_value: &str) -> PamResult<()> {
        let data = CString::new(name_value)?;
        // SAFETY: `self.pamh` contains a correct handle (obtained from `pam_start`); PAM copies
        // the null-terminated string.
        pam_err(unsafe { pam_putenv(self.pamh, data.as_ptr()) })
    }

    /// Look up a single variable of the PAM environment.
    pub fn get_env(&mut self, name: &str) -> PamResult<Option<OsString>> {
        let name = CString::new(name)?;
        // SAFETY: `self.pamh` contains a correct handle (obtained from `pam_start`).
        let value = unsafe { pam_getenv(self.pamh, name.as_ptr()) };
        if value.is_null() {
            return Ok(None);
        }

        // SAFETY: a non-NULL result points into PAM's own copy of the environment, which
        // stays valid until the next call on this handle; it is copied right away.
        let bytes = unsafe { CStr::from_ptr(value) }.to_bytes();
        Ok(Some(OsStr::from_bytes(bytes).to_owned()))
    }

    /// Get a full listing of the current PAM environment
    pub fn env(&mut self) -> PamResult<Vec<(OsString, OsString)>> {
        let mut res = Vec::new();
        // SAFETY: `self.pamh` contains a correct handle (obtained from `pam_start`).
        // pam_getenvlist returns a malloc()'d, NULL-terminated array of malloc()'d
        // "name=value" strings, or NULL on failure.
        let envs = unsafe { pam_getenvlist(self.pamh) };
        if envs.is_null() {
            return Err(PamError::EnvListFailure);
        }

        let mut curr_env = envs;
        // SAFETY: `curr_env` always points into the array, and only its final element is NULL
        while let Some(curr_str) = NonNull::new(unsafe { curr_env.read() }) {
            // SAFETY: `curr_str` points to a valid null-terminated string
            let entry = unsafe { CStr::from_ptr(curr_str.as_ptr()) };
            if let Some(pair) = split_env_entry(entry.to_bytes()) {
                res.push(pair);
            }

            // SAFETY: the string was malloc()'d, is ours to free and was copied above
            unsafe { libc::free(curr_str.as_ptr().cast()) };
            // SAFETY: `curr_env` was not the last element, so the next one is still in the array
            curr_env = unsafe { curr_env.offset(1) };
        }

        // SAFETY: the array itself was malloc()'d as well
        unsafe { libc::free(envs.cast()) };

        Ok(res)
    }

    /// Set one of the string items of this transaction.
    pub fn set_item(&mut self, item: PamItem, value: &str) -> PamResult<()> {
        let data = CString::new(value)?;
        // SAFETY: `self.pamh` contains a correct handle (obtained from `pam_start`); furthermore,
        // `data.as_ptr()` will point to a correct null-terminated string, which PAM copies.
        pam_err(unsafe {
            pam_set_item(self.pamh, item.as_int(), data.as_ptr() as *const c_void)
        })
    }

    /// Get one of the string items of this transaction; `None` if it was never set.
    pub fn get_item(&mut self, item: PamItem) -> PamResult<Option<String>> {
        let mut data = std::ptr::null();
        // SAFETY: `self.pamh` contains a correct handle (obtained from `pam_start`)
        pam_err(unsafe { pam_get_item(self.pamh, item.as_int(), &mut data) })?;

        if data.is_null() {
            return Ok(None);
        }

        // SAFETY: the contract for `pam_get_item` ensures that if `data` was touched by
        // `pam_get_item`, it will point to a valid null-terminated string for string items.
        let cstr = unsafe { CStr::from_ptr(data as *const c_char) };

        Ok(Some(cstr.to_str()?.to_owned()))
    }

    /// Set the user that will be authenticated.
    pub fn set_user(&mut self, user: &str) -> PamResult<()> {
        self.set_item(PamItem::User, user)
    }

    /// Get the user that is currently active in the PAM handle
    pub fn get_user(&mut self) -> PamResult<String> {
        self.get_item(PamItem::User)?.ok_or_else(|| {
            PamError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "PAM didn't return username",
            ))
        })
    }

    /// Check if anything panicked since the last call.
    pub fn has_panicked(&self) -> bool {
        // SAFETY: self.data_ptr was created by Box::into_raw
        unsafe { (*self.data_ptr).panicked }
    }
}

/// Split a `name=value` entry of the PAM environment at its first `=`.
fn split_env_entry(entry: &[u8]) -> Option<(OsString, OsString)> {
    let pos = entry.iter().position(|b| *b == b'=')?;
    let key = OsStr::from_bytes(&entry[..pos]).to_owned();
    let value = OsStr::from_bytes(&entry[pos + 1..]).to_owned();
    Some((key, value))
}

impl<H: ConversationHandler> Drop for PamContext<H> {
    fn drop(&mut self) {
        self.close_session();

        // SAFETY: `self.pamh` contains a correct handle (obtained from `pam_start`)
        unsafe {
            pam_end(
                self.pamh,
                self.last_pam_status.unwrap_or(PAM_SUCCESS as c_int) | PAM_DATA_SILENT as c_int,
            )
        };

        // PAM no longer holds on to the conversation state
        // SAFETY: self.data_ptr was created by Box::into_raw
        drop(unsafe { Box::from_raw(self.data_ptr) });
    }
}
