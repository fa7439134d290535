//! 通道类别与端点解析。
//! Channel classes and endpoint resolution.

use crate::{
    config::EndpointConfig,
    error::{Error, Result},
};
use std::fmt;
use url::Url;

/// A logical feed category. Each class is served by at most one live transport.
///
/// 逻辑上的信息流类别。每个类别最多由一个实时传输承载。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelClass {
    /// The signed-in user's personal feed.
    /// 登录用户的个人信息流。
    Home,
    /// Entries from the local instance.
    /// 本实例的条目。
    Local,
    /// Personal feed mixed with local entries.
    /// 个人信息流与本地条目的混合。
    Social,
    /// Everything the instance knows about, federated included.
    /// 实例所知的全部条目，包括联邦条目。
    Global,
}

impl ChannelClass {
    /// Every class, in registry order.
    pub const ALL: [ChannelClass; 4] = [
        ChannelClass::Home,
        ChannelClass::Local,
        ChannelClass::Social,
        ChannelClass::Global,
    ];

    /// Position of this class in [`ChannelClass::ALL`].
    pub(crate) const fn index(self) -> usize {
        match self {
            ChannelClass::Home => 0,
            ChannelClass::Local => 1,
            ChannelClass::Social => 2,
            ChannelClass::Global => 3,
        }
    }

    /// Whether the server only serves this class to an authenticated client.
    ///
    /// 服务器是否只向已认证的客户端提供此类别。
    pub const fn requires_credential(self) -> bool {
        matches!(self, ChannelClass::Home | ChannelClass::Social)
    }

    /// The name used for this class in endpoint paths.
    pub const fn wire_name(self) -> &'static str {
        match self {
            ChannelClass::Home => "homeTimeline",
            ChannelClass::Local => "localTimeline",
            ChannelClass::Social => "hybridTimeline",
            ChannelClass::Global => "globalTimeline",
        }
    }
}

impl fmt::Display for ChannelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Builds the streaming URL for `class`.
///
/// The WebSocket scheme mirrors the origin's security level. The credential is
/// attached only when the class requires one; the caller has already checked
/// that it is present in that case.
///
/// 为 `class` 构建流式 URL。WebSocket 协议跟随源地址的安全级别。
/// 仅当类别需要凭证时才附加凭证。
pub fn resolve_endpoint(
    config: &EndpointConfig,
    class: ChannelClass,
    credential: Option<&str>,
) -> Result<Url> {
    let mut url = Url::parse(&config.origin)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::UnsupportedScheme(other.to_string())),
    };
    // http(s) and ws(s) are all "special" schemes, so the swap cannot fail.
    let _ = url.set_scheme(scheme);

    let prefix = config.path_prefix.trim_matches('/');
    let path = if prefix.is_empty() {
        format!("/{}", class.wire_name())
    } else {
        format!("/{}/{}", prefix, class.wire_name())
    };
    url.set_path(&path);
    url.set_query(None);

    if class.requires_credential() {
        if let Some(token) = credential {
            url.query_pairs_mut().append_pair(&config.token_param, token);
        }
    }
    Ok(url)
}
