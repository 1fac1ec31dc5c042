//! Route identities used to select ratelimit buckets.
//!
//! A [`Path`] is the *base route*: the HTTP method plus the endpoint template
//! with its placeholders intact. The API assigns ratelimit bucket hashes per
//! base route.
//!
//! A [`Route`] is a *formatted route*: a base route with its major parameters
//! bound. Guild, channel and webhook IDs are the only path values that
//! participate in bucketing; two requests that differ in any other path
//! parameter share a bucket.

use std::{
    borrow::Cow,
    fmt::{Display, Formatter, Result as FmtResult, Write},
};

/// HTTP method of a request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Method {
    /// DELETE method.
    Delete,
    /// GET method.
    Get,
    /// PATCH method.
    Patch,
    /// POST method.
    Post,
    /// PUT method.
    Put,
}

impl Method {
    /// Name of the method.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// A base route: method plus endpoint template.
///
/// The template keeps its placeholders, for example
/// `/channels/{channel}/messages`. Base routes are the keys of the
/// route-to-hash mapping the ratelimiter learns from response headers.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Path {
    /// Method of the route.
    method: Method,
    /// Endpoint template with placeholders intact.
    template: Cow<'static, str>,
}

impl Path {
    /// Create a new base route from a method and an endpoint template.
    pub fn new(method: Method, template: impl Into<Cow<'static, str>>) -> Self {
        Self {
            method,
            template: template.into(),
        }
    }

    /// Method of the route.
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Endpoint template of the route.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Whether the route creates a reaction on a message.
    ///
    /// Delays on this route are expected during normal operation and are
    /// logged at a lower severity.
    pub fn is_create_reaction(&self) -> bool {
        self.method == Method::Put
            && self.template.contains("/reactions/")
            && self.template.ends_with("/@me")
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.method, f)?;
        f.write_str(" ")?;

        f.write_str(&self.template)
    }
}

/// A formatted route: a base route with its major parameters bound.
///
/// Only the guild, channel and webhook IDs affect which bucket a request is
/// queued on. Bind them with [`guild`], [`channel`] and [`webhook`].
///
/// [`guild`]: Self::guild
/// [`channel`]: Self::channel
/// [`webhook`]: Self::webhook
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Route {
    /// Base route.
    base: Path,
    /// Bound channel ID, if any.
    channel_id: Option<u64>,
    /// Bound guild ID, if any.
    guild_id: Option<u64>,
    /// Bound webhook ID, if any.
    webhook_id: Option<u64>,
}

impl Route {
    /// Create a new formatted route with no major parameters bound.
    pub fn new(method: Method, template: impl Into<Cow<'static, str>>) -> Self {
        Self {
            base: Path::new(method, template),
            channel_id: None,
            guild_id: None,
            webhook_id: None,
        }
    }

    /// Bind the channel ID major parameter.
    #[must_use]
    pub const fn channel(mut self, channel_id: u64) -> Self {
        self.channel_id = Some(channel_id);

        self
    }

    /// Bind the guild ID major parameter.
    #[must_use]
    pub const fn guild(mut self, guild_id: u64) -> Self {
        self.guild_id = Some(guild_id);

        self
    }

    /// Bind the webhook ID major parameter.
    #[must_use]
    pub const fn webhook(mut self, webhook_id: u64) -> Self {
        self.webhook_id = Some(webhook_id);

        self
    }

    /// Base route of the formatted route.
    pub const fn base(&self) -> &Path {
        &self.base
    }

    /// Major parameters in `(guild, channel, webhook)` order.
    pub const fn major_params(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (self.guild_id, self.channel_id, self.webhook_id)
    }

    /// Key of the bucket this route is queued on.
    ///
    /// When the base route's hash is known the key is
    /// `{hash}:{guild}:{channel}:{webhook}` with absent parameters left
    /// empty. When it is not, a synthetic `unlimited+` hash derived from the
    /// formatted route takes its place; the two forms never collide.
    pub(crate) fn bucket_key(&self, hash: Option<&str>) -> String {
        let mut key = String::new();

        if let Some(hash) = hash {
            key.push_str(hash);
        } else {
            let _ = write!(key, "unlimited+{self}");
        }

        for id in [self.guild_id, self.channel_id, self.webhook_id] {
            key.push(':');

            if let Some(id) = id {
                let _ = write!(key, "{id}");
            }
        }

        key
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.base, f)
    }
}
