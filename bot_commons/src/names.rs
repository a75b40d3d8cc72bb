use html_escape::encode_text;
use teloxide::types::User;

/// Name a user is known by in chats: `@username` if they have one, their full
/// name otherwise.
///
/// This is not a stable identity. People can change both at will.
#[must_use]
pub fn user_display_name(user: &User) -> String {
    if let Some(username) = &user.username {
        format!("@{username}")
    } else {
        user.full_name()
    }
}

/// HTML mention of a user that pings them even without a username.
#[must_use]
pub fn user_mention_html(user: &User) -> String {
    if let Some(username) = &user.username {
        return format!("@{username}");
    }

    let mut full_name = encode_text(&user.first_name).into_owned();
    if let Some(last_name) = &user.last_name {
        full_name.push(' ');
        full_name.push_str(&encode_text(last_name));
    }

    format!("<a href=\"tg://user?id={}\">{}</a>", user.id, full_name)
}
